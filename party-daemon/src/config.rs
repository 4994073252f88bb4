//! Daemon settings read from `~/.party/config.yaml`.
//!
//! Every field is optional; a missing file yields the defaults.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, DaemonError};
use crate::paths::{backend_socket_path, config_path, socket_path};

pub const DEFAULT_NOTICE_BACKLOG: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Control socket; defaults to `~/.party/daemon.sock`.
    pub socket: Option<PathBuf>,
    /// Socket backends attach to; defaults to `~/.party/backends.sock`.
    pub backend_socket: Option<PathBuf>,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
    /// Emit JSON log lines instead of plain text.
    pub log_json: bool,
    /// Notices kept per user before the oldest is dropped.
    pub notice_backlog: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket: None,
            backend_socket: None,
            log_filter: None,
            log_json: false,
            notice_backlog: DEFAULT_NOTICE_BACKLOG,
        }
    }
}

impl DaemonConfig {
    pub fn load(home: &Path) -> Result<Self, DaemonError> {
        Self::load_from(&config_path(home))
    }

    pub fn load_from(path: &Path) -> Result<Self, DaemonError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(io_err(path, err)),
        };
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw).map_err(|source| DaemonError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn socket_path(&self, home: &Path) -> PathBuf {
        self.socket.clone().unwrap_or_else(|| socket_path(home))
    }

    pub fn backend_socket_path(&self, home: &Path) -> PathBuf {
        self.backend_socket
            .clone()
            .unwrap_or_else(|| backend_socket_path(home))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn write_config(home: &TempDir, body: &str) {
        let path = config_path(home.path());
        fs::create_dir_all(path.parent().expect("config parent")).expect("mkdir");
        fs::write(path, body).expect("write config");
    }

    #[test]
    fn missing_file_gives_defaults() {
        let home = TempDir::new().expect("home");
        let config = DaemonConfig::load(home.path()).expect("load");
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.socket_path(home.path()), socket_path(home.path()));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let home = TempDir::new().expect("home");
        write_config(&home, "log_filter: party_core=debug\nnotice_backlog: 4\n");

        let config = DaemonConfig::load(home.path()).expect("load");
        assert_eq!(config.log_filter.as_deref(), Some("party_core=debug"));
        assert_eq!(config.notice_backlog, 4);
        assert!(!config.log_json);
        assert_eq!(
            config.backend_socket_path(home.path()),
            backend_socket_path(home.path())
        );
    }

    #[test]
    fn socket_overrides_are_used_verbatim() {
        let home = TempDir::new().expect("home");
        write_config(&home, "socket: /tmp/p.sock\nbackend_socket: /tmp/b.sock\n");

        let config = DaemonConfig::load(home.path()).expect("load");
        assert_eq!(config.socket_path(home.path()), PathBuf::from("/tmp/p.sock"));
        assert_eq!(
            config.backend_socket_path(home.path()),
            PathBuf::from("/tmp/b.sock")
        );
    }

    #[rstest]
    #[case::unknown_key("colour: blue\n")]
    #[case::wrong_type("notice_backlog: lots\n")]
    #[case::not_a_map("- just\n- a list\n")]
    fn malformed_file_is_a_config_error(#[case] body: &str) {
        let home = TempDir::new().expect("home");
        write_config(&home, body);

        let err = DaemonConfig::load(home.path()).expect_err("should fail");
        assert!(matches!(err, DaemonError::Config { .. }), "got {err:?}");
    }

    #[test]
    fn empty_file_gives_defaults() {
        let home = TempDir::new().expect("home");
        write_config(&home, "\n");
        assert_eq!(
            DaemonConfig::load(home.path()).expect("load"),
            DaemonConfig::default()
        );
    }
}
