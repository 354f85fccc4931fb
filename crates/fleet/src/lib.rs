pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod utils;

pub use config::FleetConfig;
pub use error::Error;
