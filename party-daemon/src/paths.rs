use std::path::{Path, PathBuf};

pub const DAEMON_LABEL: &str = "dev.party.daemon";

pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const BACKEND_SOCKET: &str = "backends.sock";
pub const CONFIG_FILE: &str = "config.yaml";

pub fn party_root(home: &Path) -> PathBuf {
    home.join(".party")
}

pub fn socket_path(home: &Path) -> PathBuf {
    party_root(home).join(DAEMON_SOCKET)
}

pub fn backend_socket_path(home: &Path) -> PathBuf {
    party_root(home).join(BACKEND_SOCKET)
}

pub fn config_path(home: &Path) -> PathBuf {
    party_root(home).join(CONFIG_FILE)
}
