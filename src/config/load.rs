//! Config discovery and loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::schema::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },
}

/// Default config file location: `$LIASIS_CONFIG`, then the XDG config dir.
pub fn config_path() -> PathBuf {
    if let Some(path) = env::var_os("LIASIS_CONFIG") {
        return PathBuf::from(path);
    }
    config_dir().join("config.toml")
}

/// Load the config from `path`, or from the default location when `None`.
///
/// A missing file at the *default* location yields defaults; an explicitly
/// named file must exist.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (config_path(), false),
    };
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(source) if !explicit && source.kind() == std::io::ErrorKind::NotFound => {
            let mut config = Config::default();
            apply_env_overrides(&mut config);
            return Ok(config);
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    let mut config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path,
        source: Box::new(source),
    })?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Environment overrides, applied after file parsing.
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(path) = env::var_os("LIASIS_SOCKET") {
        config.control.socket_path = Some(PathBuf::from(path));
    }
    if let Some(dir) = env::var_os("LIASIS_ARCHIVE_DIR") {
        config.archive.dir = Some(PathBuf::from(dir));
    }
    if let Some(dir) = env::var_os("LIASIS_LOG_DIR") {
        config.logging.file_dir = Some(PathBuf::from(dir));
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME") {
        if !dir.is_empty() {
            return PathBuf::from(dir).join("liasis");
        }
    }
    if let Some(home) = env::var_os("HOME") {
        if !home.is_empty() {
            return PathBuf::from(home).join(".config").join("liasis");
        }
    }
    env::temp_dir().join("liasis")
}

pub fn data_dir() -> PathBuf {
    if let Some(dir) = env::var_os("XDG_DATA_HOME") {
        if !dir.is_empty() {
            return PathBuf::from(dir).join("liasis");
        }
    }
    if let Some(home) = env::var_os("HOME") {
        if !home.is_empty() {
            return PathBuf::from(home).join(".local").join("share").join("liasis");
        }
    }
    env::temp_dir().join("liasis")
}

/// Runtime directory candidates for the control socket, most preferred
/// first. The daemon uses the first one it can create.
pub fn runtime_dir_candidates() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(dir) = env::var_os("XDG_RUNTIME_DIR") {
        if !dir.is_empty() {
            dirs.push(PathBuf::from(dir).join("liasis"));
        }
    }
    if let Some(home) = env::var_os("HOME") {
        if !home.is_empty() {
            dirs.push(PathBuf::from(home).join(".liasis"));
        }
    }
    dirs.push(env::temp_dir().join("liasis"));
    dirs
}

/// Default control socket path: the first creatable runtime dir.
pub fn default_socket_path() -> PathBuf {
    for dir in runtime_dir_candidates() {
        if fs::create_dir_all(&dir).is_ok() {
            return dir.join("control.sock");
        }
    }
    env::temp_dir().join("liasis-control.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn loads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[control]\nmax_frame = 1024\n").unwrap();
        let config = load(Some(&path)).unwrap();
        assert_eq!(config.control.max_frame, 1024);
    }

    #[test]
    fn parse_errors_carry_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "not toml [").unwrap();
        let err = load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("config.toml"), "{err}");
    }
}
