pub mod config;
pub mod console;
pub mod errors;
pub mod logging;
