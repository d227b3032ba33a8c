pub mod config;
pub mod constants;
pub mod core;
pub mod discovery;
pub mod networking;

pub mod cache;
pub mod routing;
pub mod storage;
pub mod sync;
pub mod utils;
