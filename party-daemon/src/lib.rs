//! Party daemon: hosts the party registry behind a JSON control socket and
//! relays sync frames to attached backends.

pub mod config;
mod error;
pub mod notices;
pub mod paths;
pub mod protocol;
pub mod relay;
mod runtime;
pub mod sessions;

pub use config::DaemonConfig;
pub use error::DaemonError;
pub use notices::NoticeBoard;
pub use protocol::{
    request, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use relay::{attach_blocking, BackendRelay, Handshake};
pub use runtime::{dispatch, init_tracing, run, start_blocking, DaemonState};
pub use sessions::{Session, Sessions};
