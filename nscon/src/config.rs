//! Layered configuration: compiled-in defaults, an optional TOML file,
//! `NSCON_`-prefixed environment variables, then CLI flags, in that
//! priority order (each layer overrides only the fields it actually sets).

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_NSINIT_PATH: &str = "/sbin/nsinit";
const DEFAULT_LOCKS_DIR: &str = "/var/lib/nscon/locks";
const DEFAULT_CONFIG_PATH: &str = "/etc/nscon/config.toml";

#[derive(Debug, Clone)]
pub struct NsconConfig {
    pub nsinit_path: PathBuf,
    pub nsinit_uid: u32,
    pub nsinit_gid: u32,
    pub nscon_output_fd: Option<i32>,
    pub locks_dir: PathBuf,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

impl Default for NsconConfig {
    fn default() -> Self {
        NsconConfig {
            nsinit_path: PathBuf::from(DEFAULT_NSINIT_PATH),
            nsinit_uid: 0,
            nsinit_gid: 0,
            nscon_output_fd: None,
            locks_dir: PathBuf::from(DEFAULT_LOCKS_DIR),
            log_level: None,
            log_format: None,
        }
    }
}

/// The subset of [`NsconConfig`] any one layer may supply; `None` means
/// "this layer has no opinion", so later layers merge over it field by
/// field rather than replacing it wholesale.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
struct ConfigLayer {
    nsinit_path: Option<PathBuf>,
    nsinit_uid: Option<u32>,
    nsinit_gid: Option<u32>,
    nscon_output_fd: Option<i32>,
    locks_dir: Option<PathBuf>,
    log_level: Option<String>,
    log_format: Option<String>,
}

impl ConfigLayer {
    fn merge_into(self, config: &mut NsconConfig) {
        if let Some(v) = self.nsinit_path {
            config.nsinit_path = v;
        }
        if let Some(v) = self.nsinit_uid {
            config.nsinit_uid = v;
        }
        if let Some(v) = self.nsinit_gid {
            config.nsinit_gid = v;
        }
        if let Some(v) = self.nscon_output_fd {
            config.nscon_output_fd = Some(v);
        }
        if let Some(v) = self.locks_dir {
            config.locks_dir = v;
        }
        if let Some(v) = self.log_level {
            config.log_level = Some(v);
        }
        if let Some(v) = self.log_format {
            config.log_format = Some(v);
        }
    }
}

/// CLI-supplied overrides, the highest-priority layer. Every field is an
/// explicit `Option` so "flag not passed" and "flag passed" are
/// distinguishable; see [`crate::cli::GlobalArgs`].
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub nsinit_path: Option<PathBuf>,
    pub nsinit_uid: Option<u32>,
    pub nsinit_gid: Option<u32>,
    pub nscon_output_fd: Option<i32>,
    pub config_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

impl From<CliOverrides> for ConfigLayer {
    fn from(cli: CliOverrides) -> Self {
        ConfigLayer {
            nsinit_path: cli.nsinit_path,
            nsinit_uid: cli.nsinit_uid,
            nsinit_gid: cli.nsinit_gid,
            nscon_output_fd: cli.nscon_output_fd,
            locks_dir: None,
            log_level: cli.log_level,
            log_format: cli.log_format,
        }
    }
}

/// Loads and merges every layer. A missing config file (default location or
/// `$NSCON_CONFIG`) is not an error; a present-but-unparsable one is.
pub fn load(cli: CliOverrides) -> Result<NsconConfig> {
    let mut config = NsconConfig::default();

    let config_path = cli
        .config_path
        .clone()
        .or_else(|| env::var_os("NSCON_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    file_layer(&config_path)?.merge_into(&mut config);
    env_layer()?.merge_into(&mut config);
    ConfigLayer::from(cli).merge_into(&mut config);

    Ok(config)
}

fn file_layer(path: &Path) -> Result<ConfigLayer> {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigLayer::default()),
        Err(e) => Err(e).with_context(|| format!("reading config file {}", path.display())),
    }
}

fn env_layer() -> Result<ConfigLayer> {
    Ok(ConfigLayer {
        nsinit_path: env::var_os("NSCON_NSINIT_PATH").map(PathBuf::from),
        nsinit_uid: parse_env_u32("NSCON_NSINIT_UID")?,
        nsinit_gid: parse_env_u32("NSCON_NSINIT_GID")?,
        nscon_output_fd: parse_env_i32("NSCON_NSCON_OUTPUT_FD")?,
        locks_dir: env::var_os("NSCON_LOCKS_DIR").map(PathBuf::from),
        log_level: env::var("NSCON_LOG_LEVEL").ok(),
        log_format: env::var("NSCON_LOG_FORMAT").ok(),
    })
}

fn parse_env_u32(name: &str) -> Result<Option<u32>> {
    match env::var(name) {
        Ok(v) => Ok(Some(
            v.parse().with_context(|| format!("{name} is not a valid integer"))?,
        )),
        Err(_) => Ok(None),
    }
}

fn parse_env_i32(name: &str) -> Result<Option<i32>> {
    match env::var(name) {
        Ok(v) => Ok(Some(
            v.parse().with_context(|| format!("{name} is not a valid integer"))?,
        )),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_when_nothing_overrides() {
        let config = load(CliOverrides {
            config_path: Some(PathBuf::from("/nonexistent/nscon.toml")),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.nsinit_path, PathBuf::from(DEFAULT_NSINIT_PATH));
        assert_eq!(config.locks_dir, PathBuf::from(DEFAULT_LOCKS_DIR));
    }

    #[test]
    fn file_layer_is_overridden_by_cli() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "nsinit_uid = 5\nlocks_dir = \"/from/file\"\n").unwrap();
        let config = load(CliOverrides {
            config_path: Some(path),
            nsinit_uid: Some(42),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.nsinit_uid, 42);
        assert_eq!(config.locks_dir, PathBuf::from("/from/file"));
    }

    #[test]
    #[serial]
    fn env_layer_overrides_file_but_not_cli() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "nsinit_uid = 5\n").unwrap();
        env::set_var("NSCON_NSINIT_UID", "7");
        let config = load(CliOverrides {
            config_path: Some(path.clone()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.nsinit_uid, 7);

        let config = load(CliOverrides {
            config_path: Some(path),
            nsinit_uid: Some(9),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.nsinit_uid, 9);
        env::remove_var("NSCON_NSINIT_UID");
    }

    #[test]
    fn missing_config_file_is_not_an_error() {
        let config = load(CliOverrides {
            config_path: Some(PathBuf::from("/definitely/missing/nscon.toml")),
            ..Default::default()
        });
        assert!(config.is_ok());
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not = [valid").unwrap();
        let config = load(CliOverrides {
            config_path: Some(path),
            ..Default::default()
        });
        assert!(config.is_err());
    }
}
