pub mod clock;
pub mod config;
pub mod error;
pub mod fd_table;
pub mod memory;
pub mod preload;
pub mod process;
pub mod vfs;
