pub mod config;
pub mod dcc;
pub mod error;
pub mod logging;
pub mod nickserv;
pub mod pool;
pub mod protocol;
