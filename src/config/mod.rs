//! Config loading and schema.

pub mod load;
mod schema;

pub use load::{
    apply_env_overrides, config_dir, config_path, data_dir, default_socket_path, load,
    runtime_dir_candidates, ConfigError,
};
pub use schema::{ArchiveConfig, ClientConfig, Config, ControlConfig, LoggingConfig};
