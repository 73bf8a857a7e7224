#![forbid(unsafe_code)]

pub mod bt;
pub mod cli;
pub mod config;
pub mod core;
pub mod daemon;
pub mod error;
pub mod telemetry;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
