//! Central parsing of the command-line parameters.

use alloc::string::String;
use alloc::vec::Vec;

use ahash::RandomState;
use hashbrown::hash_map::Iter;
use hashbrown::HashMap;
use hermit_sync::OnceCell;

use crate::arch::x86_64::kernel::boot_info;

static CLI: OnceCell<Cli> = OnceCell::new();

pub fn init() {
	CLI.set(Cli::default()).unwrap();
}

#[derive(Debug)]
struct Cli {
	freq: Option<u16>,
	/// Whether ASLR is enabled by default for new address spaces (spec.md §4.1's
	/// `/sys/vm_aslr` boot-time default).
	aslr: bool,
	log_level: log::LevelFilter,
	env_vars: HashMap<String, String, RandomState>,
	args: Vec<String>,
}

/// Whether the kernel is running under the "uhyve" hypervisor.
pub fn is_uhyve() -> bool {
	boot_info().uhyve
}

impl Default for Cli {
	fn default() -> Self {
		let mut freq = None;
		let mut aslr = true;
		let mut log_level = log::LevelFilter::Info;
		let mut env_vars = HashMap::<String, String, RandomState>::with_hasher(
			RandomState::with_seeds(0, 0, 0, 0),
		);
		let mut args = Vec::new();

		let cmdline = boot_info().command_line.unwrap_or("");
		let words = shell_words::split(cmdline).unwrap();
		debug!("cli_words = {words:?}");

		let mut words = words.into_iter();
		let expect_arg = |arg: Option<String>, name: &str| {
			arg.unwrap_or_else(|| {
				panic!("The argument '{name}' requires a value but none was supplied")
			})
		};
		while let Some(word) = words.next() {
			match word.as_str() {
				"-freq" => {
					let s = expect_arg(words.next(), word.as_str());
					freq = Some(s.parse().unwrap());
				}
				"-aslr" => {
					let s = expect_arg(words.next(), word.as_str());
					aslr = match s.as_str() {
						"on" => true,
						"off" => false,
						other => panic!("'-aslr' expects 'on' or 'off', found '{other}'"),
					};
				}
				"-loglevel" => {
					let s = expect_arg(words.next(), word.as_str());
					log_level = s.parse().unwrap_or_else(|_| {
						panic!("'-loglevel' expects one of off/error/warn/info/debug/trace")
					});
				}
				"-ip" => {
					let ip = expect_arg(words.next(), word.as_str());
					env_vars.insert(String::from("HERMIT_IP"), ip);
				}
				"-mask" => {
					let mask = expect_arg(words.next(), word.as_str());
					env_vars.insert(String::from("HERMIT_MASK"), mask);
				}
				"-gateway" => {
					let gateway = expect_arg(words.next(), word.as_str());
					env_vars.insert(String::from("HERMIT_GATEWAY"), gateway);
				}
				"--" => args.extend(&mut words),
				word => panic!(
					"Found argument '{word}' which wasn't expected, or isn't valid in this context

 		If you tried to supply `{word}` as a value rather than a flag, use `-- {word}`"
				),
			};
		}

		Self {
			freq,
			aslr,
			log_level,
			env_vars,
			args,
		}
	}
}

/// CPU Frequency in MHz if given through the -freq command-line parameter.
pub fn freq() -> Option<u16> {
	CLI.get().unwrap().freq
}

/// Whether newly created address spaces randomize region placement by default.
pub fn aslr_enabled() -> bool {
	CLI.get().unwrap().aslr
}

/// Log level threshold parsed from the boot command line, backing `KernelLogger`.
pub fn log_level() -> log::LevelFilter {
	CLI.get().map(|cli| cli.log_level).unwrap_or(log::LevelFilter::Info)
}

pub fn vars() -> Iter<'static, String, String> {
	CLI.get().unwrap().env_vars.iter()
}

/// Returns the cmdline argument passed in after "--"
pub fn args() -> &'static [String] {
	CLI.get().unwrap().args.as_slice()
}
