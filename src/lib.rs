pub mod cli;
pub mod config;
pub mod entry;
pub mod extract;
pub mod monitor;
pub mod offset;
pub mod sink;
pub mod source;
