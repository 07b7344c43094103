mod addr;

pub use addr::{get_unused_addr, spawn_listener};
