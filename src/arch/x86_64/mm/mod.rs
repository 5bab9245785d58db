pub mod paging;

pub use memory_addresses::{PhysAddr, VirtAddr};
pub use paging::init_page_tables;

pub fn init() {
	paging::init();
}
