use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use party_core::{
    Bridge, PartyRegistry, Promotion, Rejection, Removal, RosterView, UserId,
};

use crate::config::DaemonConfig;
use crate::error::{io_err, DaemonError};
use crate::notices::NoticeBoard;
use crate::paths::{party_root, DAEMON_LABEL};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::relay::{self, BackendRelay};
use crate::sessions::Sessions;

/// Everything a request handler touches. Shared by every socket client.
#[derive(Debug)]
pub struct DaemonState {
    pub sessions: Arc<Sessions>,
    pub relay: Arc<BackendRelay>,
    pub notices: Arc<NoticeBoard>,
    pub registry: PartyRegistry,
    socket: PathBuf,
    backend_socket: PathBuf,
    started_at_unix: u64,
}

impl DaemonState {
    pub fn new(home: &Path, config: &DaemonConfig) -> Self {
        let sessions = Arc::new(Sessions::new());
        let relay = Arc::new(BackendRelay::new());
        let notices = Arc::new(NoticeBoard::new(config.notice_backlog));
        let registry = PartyRegistry::new(Bridge::new(
            sessions.clone(),
            relay.clone(),
            notices.clone(),
        ));
        Self {
            sessions,
            relay,
            notices,
            registry,
            socket: config.socket_path(home),
            backend_socket: config.backend_socket_path(home),
            started_at_unix: unix_seconds_now(),
        }
    }

    /// Session id for `name`, for the acting user.
    fn actor(&self, name: &str) -> Result<UserId, DaemonResponse> {
        self.sessions
            .user_by_name(name)
            .ok_or_else(|| DaemonResponse::error(format!("user '{name}' is not connected")))
    }

    /// Session id for `name`, for the user being acted on.
    fn target(&self, name: &str) -> Result<UserId, DaemonResponse> {
        self.sessions
            .user_by_name(name)
            .ok_or_else(|| Rejection::TargetOffline.into())
    }

    fn name(&self, user: &UserId) -> String {
        self.sessions
            .name_of(user)
            .unwrap_or_else(|| user.to_string())
    }

    fn names(&self, users: &[UserId]) -> Vec<String> {
        users.iter().map(|user| self.name(user)).collect()
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    let config = DaemonConfig::load(home)?;
    init_tracing(&config);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf, config: DaemonConfig) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let state = Arc::new(DaemonState::new(&home, &config));
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let control_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result =
                control_server_task(state, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let backend_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = backend_server_task(state, shutdown.clone()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    tracing::info!(
        socket = %state.socket.display(),
        backend_socket = %state.backend_socket.display(),
        "party daemon started",
    );

    let (control_result, backend_result, signal_result) =
        tokio::join!(control_handle, backend_handle, signal_handle);

    handle_join("control_server", control_result)?;
    handle_join("backend_server", backend_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn control_server_task(
    state: Arc<DaemonState>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = state.socket.clone();
    let listener = bind_socket(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn backend_server_task(
    state: Arc<DaemonState>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let mut shutdown_rx = shutdown_tx.subscribe();
    let socket = state.backend_socket.clone();
    let listener = bind_socket(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let relay = state.relay.clone();
                let shutdown_rx = shutdown_tx.subscribe();
                tokio::spawn(async move {
                    if let Err(err) = relay::serve_backend(stream, relay, shutdown_rx).await {
                        tracing::warn!(error = %err, "backend connection error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    state: Arc<DaemonState>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: Result<DaemonRequest, _> = serde_json::from_str(&line);
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request == DaemonRequest::Stop;
        let response = dispatch(&state, request);
        write_response(&mut writer, &response).await?;
        if stop {
            let _ = shutdown_tx.send(());
            break;
        }
    }

    Ok(())
}

/// Maps one control request onto the registry and the host hooks.
///
/// Must run inside a tokio runtime: invites schedule their expiry timer.
pub fn dispatch(state: &DaemonState, request: DaemonRequest) -> DaemonResponse {
    let cmd = request.name();
    let response = match handle(state, request) {
        Ok(data) => DaemonResponse::ok(data),
        Err(response) => response,
    };
    if let Some(error) = &response.error {
        tracing::debug!(cmd, error = %error, "request refused");
    }
    response
}

fn handle(state: &DaemonState, request: DaemonRequest) -> Result<Value, DaemonResponse> {
    let registry = &state.registry;
    match request {
        DaemonRequest::Status => Ok(build_status_payload(state)),
        DaemonRequest::Stop => Ok(json!({ "stopping": true })),

        DaemonRequest::Connect { user, backend, id } => {
            let id = id.unwrap_or_else(UserId::random);
            if !state.sessions.connect(id, user.clone(), backend.clone()) {
                return Err(DaemonResponse::error(format!(
                    "name '{user}' is already in use"
                )));
            }
            Ok(json!({ "user": user, "id": id, "backend": backend }))
        }
        DaemonRequest::Switch { user, backend } => {
            let id = state.actor(&user)?;
            state.sessions.switch(&id, backend.clone());
            let resynced = registry.on_backend_switch(&id);
            Ok(json!({ "user": user, "backend": backend, "resynced": resynced }))
        }
        DaemonRequest::Disconnect { user } => {
            let id = state.actor(&user)?;
            // Session goes first: once unreachable the user can no longer be
            // added to a party, so the hook below sees their final membership.
            state.sessions.disconnect(&id);
            let removal = registry.on_disconnect(&id);
            state.notices.forget(&id);
            Ok(json!({ "user": user, "removal": removal.map(removal_label) }))
        }

        DaemonRequest::Create { user } => {
            let id = state.actor(&user)?;
            let party = registry.create(&id)?;
            Ok(json!({ "party": party.id() }))
        }
        DaemonRequest::Invite { user, target } => {
            let id = state.actor(&user)?;
            let target_id = state.target(&target)?;
            let name = state.name(&target_id);
            let invited = registry.invite(&id, &target_id, &name)?;
            Ok(json!({
                "party": invited.party.id(),
                "created": invited.created,
                "invitee": name,
            }))
        }
        DaemonRequest::Accept { user, inviter } => {
            let id = state.actor(&user)?;
            let inviter_id = state.target(&inviter)?;
            let party = registry.accept(&id, &inviter_id)?;
            Ok(json!({ "party": party.id() }))
        }
        DaemonRequest::Decline { user, inviter } => {
            let id = state.actor(&user)?;
            let inviter_id = state.target(&inviter)?;
            let party = registry.decline(&id, &inviter_id)?;
            Ok(json!({ "party": party.id() }))
        }
        DaemonRequest::Join { user, target } => {
            let id = state.actor(&user)?;
            let target_id = state.target(&target)?;
            let party = registry.join(&id, &target_id)?;
            Ok(json!({ "party": party.id() }))
        }
        DaemonRequest::Kick { user, target } => {
            let id = state.actor(&user)?;
            let target_id = state.target(&target)?;
            let party = registry.kick(&id, &target_id)?;
            Ok(json!({ "party": party.id(), "kicked": state.name(&target_id) }))
        }
        DaemonRequest::Promote { user, target } => {
            let id = state.actor(&user)?;
            let target_id = state.target(&target)?;
            let promotion = registry.promote(&id, &target_id)?;
            Ok(json!({
                "promotion": promotion_label(promotion),
                "target": state.name(&target_id),
            }))
        }
        DaemonRequest::Leave { user } => {
            let id = state.actor(&user)?;
            let removal = registry.leave(&id)?;
            Ok(json!({ "removal": removal_label(removal) }))
        }
        DaemonRequest::Disband { user } => {
            let id = state.actor(&user)?;
            let party = registry.disband_by(&id)?;
            Ok(json!({ "party": party }))
        }
        DaemonRequest::Public { user, enabled } => {
            let id = state.actor(&user)?;
            let party = registry.set_public(&id, enabled)?;
            Ok(json!({ "party": party.id(), "public": enabled }))
        }
        DaemonRequest::Summon { user } => {
            let id = state.actor(&user)?;
            let summons = registry.summon(&id)?;
            Ok(json!({
                "backend": summons.backend,
                "members": state.names(&summons.members),
            }))
        }
        DaemonRequest::List { user } => {
            let id = state.actor(&user)?;
            let view = registry.list(&id)?;
            Ok(roster_payload(state, &view))
        }
        DaemonRequest::Notices { user } => {
            let id = state.actor(&user)?;
            Ok(json!({ "notices": state.notices.drain(&id) }))
        }
    }
}

fn roster_payload(state: &DaemonState, view: &RosterView) -> Value {
    json!({
        "party": view.party,
        "leader": view.leader.map(|leader| state.name(&leader)),
        "moderators": state.names(&view.moderators),
        "members": state.names(&view.members),
        "invites": state.names(&view.invites),
        "public": view.public,
    })
}

fn removal_label(removal: Removal) -> &'static str {
    match removal {
        Removal::Removed => "removed",
        Removal::Disbanded => "disbanded",
        Removal::NotMember => "not_member",
    }
}

fn promotion_label(promotion: Promotion) -> &'static str {
    match promotion {
        Promotion::Moderator => "moderator",
        Promotion::Leader => "leader",
    }
}

fn build_status_payload(state: &DaemonState) -> Value {
    json!({
        "running": true,
        "label": DAEMON_LABEL,
        "started_at_unix": state.started_at_unix,
        "sessions": state.sessions.len(),
        "users": state.sessions.list(),
        "parties": state.registry.len(),
        "backends": state.relay.attached(),
        "socket": state.socket.display().to_string(),
        "backend_socket": state.backend_socket.display().to_string(),
    })
}

fn bind_socket(socket: &Path) -> Result<UnixListener, DaemonError> {
    if let Some(parent) = socket.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }
    prepare_socket_for_bind(socket)?;
    let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
    set_socket_permissions(socket)?;
    Ok(listener)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = party_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// `RUST_LOG` wins over the config's `log_filter`; the fallback is `info`.
pub fn init_tracing(config: &DaemonConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| {
            config
                .log_filter
                .as_deref()
                .and_then(|directive| EnvFilter::try_new(directive).ok())
        })
        .unwrap_or_else(|| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if config.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use party_core::INVITE_TTL;
    use tempfile::TempDir;

    struct Harness {
        _home: TempDir,
        state: DaemonState,
    }

    impl Harness {
        fn new() -> Self {
            let home = TempDir::new().expect("home");
            let state = DaemonState::new(home.path(), &DaemonConfig::default());
            Self { _home: home, state }
        }

        fn send(&self, request: DaemonRequest) -> DaemonResponse {
            dispatch(&self.state, request)
        }

        fn ok(&self, request: DaemonRequest) -> Value {
            let response = self.send(request);
            assert!(response.ok, "request failed: {:?}", response.error);
            response.data.unwrap_or(Value::Null)
        }

        fn connect(&self, user: &str, backend: &str) {
            self.ok(DaemonRequest::Connect {
                user: user.into(),
                backend: backend.into(),
                id: None,
            });
        }
    }

    #[tokio::test]
    async fn invite_accept_and_list_by_name() {
        let h = Harness::new();
        h.connect("ann", "lobby");
        h.connect("bo", "arena");

        let invited = h.ok(DaemonRequest::Invite {
            user: "ann".into(),
            target: "bo".into(),
        });
        assert_eq!(invited["created"], json!(true));
        assert_eq!(invited["invitee"], json!("bo"));

        h.ok(DaemonRequest::Accept {
            user: "bo".into(),
            inviter: "ANN".into(),
        });
        let roster = h.ok(DaemonRequest::List { user: "bo".into() });
        assert_eq!(roster["leader"], json!("ann"));
        assert_eq!(roster["members"], json!(["bo"]));
        assert_eq!(roster["invites"], json!([]));
    }

    #[tokio::test]
    async fn unknown_actor_and_offline_target_are_refused() {
        let h = Harness::new();
        h.connect("ann", "lobby");

        let response = h.send(DaemonRequest::Create { user: "ghost".into() });
        assert!(!response.ok);
        assert!(response.error.expect("error").contains("not connected"));

        let response = h.send(DaemonRequest::Invite {
            user: "ann".into(),
            target: "ghost".into(),
        });
        assert_eq!(response, DaemonResponse::from(Rejection::TargetOffline));
    }

    #[tokio::test]
    async fn duplicate_name_is_refused() {
        let h = Harness::new();
        h.connect("ann", "lobby");
        let response = h.send(DaemonRequest::Connect {
            user: "Ann".into(),
            backend: "arena".into(),
            id: None,
        });
        assert!(!response.ok);
    }

    #[tokio::test]
    async fn leader_disconnect_disbands() {
        let h = Harness::new();
        h.connect("ann", "lobby");
        h.connect("bo", "lobby");
        h.ok(DaemonRequest::Invite {
            user: "ann".into(),
            target: "bo".into(),
        });
        h.ok(DaemonRequest::Accept {
            user: "bo".into(),
            inviter: "ann".into(),
        });

        let gone = h.ok(DaemonRequest::Disconnect { user: "ann".into() });
        assert_eq!(gone["removal"], json!("disbanded"));
        assert!(h.state.registry.is_empty());
        assert_eq!(
            h.send(DaemonRequest::List { user: "bo".into() }),
            DaemonResponse::from(Rejection::NotInParty)
        );
    }

    #[tokio::test]
    async fn switch_resyncs_only_party_members() {
        let h = Harness::new();
        h.connect("ann", "lobby");
        h.connect("solo", "lobby");
        h.ok(DaemonRequest::Create { user: "ann".into() });

        let moved = h.ok(DaemonRequest::Switch {
            user: "ann".into(),
            backend: "arena".into(),
        });
        assert_eq!(moved["resynced"], json!(true));

        let moved = h.ok(DaemonRequest::Switch {
            user: "solo".into(),
            backend: "arena".into(),
        });
        assert_eq!(moved["resynced"], json!(false));
    }

    #[tokio::test]
    async fn promote_and_summon_report_names() {
        let h = Harness::new();
        h.connect("ann", "lobby");
        h.connect("bo", "arena");
        h.ok(DaemonRequest::Invite {
            user: "ann".into(),
            target: "bo".into(),
        });
        h.ok(DaemonRequest::Accept {
            user: "bo".into(),
            inviter: "ann".into(),
        });

        let promoted = h.ok(DaemonRequest::Promote {
            user: "ann".into(),
            target: "bo".into(),
        });
        assert_eq!(promoted["promotion"], json!("moderator"));

        let summons = h.ok(DaemonRequest::Summon { user: "ann".into() });
        assert_eq!(summons["backend"], json!("lobby"));
        assert_eq!(summons["members"], json!(["bo"]));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_invite_lands_on_notice_board() {
        let h = Harness::new();
        h.connect("ann", "lobby");
        h.connect("bo", "lobby");
        h.ok(DaemonRequest::Invite {
            user: "ann".into(),
            target: "bo".into(),
        });

        tokio::time::sleep(INVITE_TTL + Duration::from_secs(1)).await;

        let drained = h.ok(DaemonRequest::Notices { user: "ann".into() });
        let notices = drained["notices"].as_array().expect("notices array");
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0]["kind"], json!("invite_expired"));
        assert_eq!(notices[0]["name"], json!("bo"));

        let again = h.ok(DaemonRequest::Notices { user: "ann".into() });
        assert_eq!(again["notices"], json!([]));
    }

    #[tokio::test]
    async fn disconnected_member_leaves_no_trace() {
        let h = Harness::new();
        h.connect("ann", "lobby");
        h.connect("bo", "arena");
        h.ok(DaemonRequest::Invite {
            user: "ann".into(),
            target: "bo".into(),
        });
        h.ok(DaemonRequest::Accept {
            user: "bo".into(),
            inviter: "ann".into(),
        });
        let bo = h.state.sessions.user_by_name("bo").expect("bo id");

        let gone = h.ok(DaemonRequest::Disconnect { user: "bo".into() });
        assert_eq!(gone["removal"], json!("removed"));
        assert!(h.state.registry.find_by_user(&bo).is_none());
        let ann = h.state.sessions.user_by_name("ann").expect("ann id");
        let party = h.state.registry.find_by_user(&ann).expect("ann keeps party");
        assert_eq!(party.member_count(), 1);

        let late = h.send(DaemonRequest::Accept {
            user: "bo".into(),
            inviter: "ann".into(),
        });
        assert!(!late.ok);
    }

    #[test]
    fn status_reports_counts_and_sockets() {
        let h = Harness::new();
        let status = build_status_payload(&h.state);
        assert_eq!(status["running"], json!(true));
        assert_eq!(status["label"], json!(DAEMON_LABEL));
        assert_eq!(status["sessions"], json!(0));
        assert_eq!(status["users"], json!([]));
        assert_eq!(status["parties"], json!(0));
        assert_eq!(status["backends"], json!([]));
        assert!(status["socket"]
            .as_str()
            .expect("socket")
            .ends_with("daemon.sock"));

        h.connect("ann", "lobby");
        let status = build_status_payload(&h.state);
        assert_eq!(status["users"][0]["name"], json!("ann"));
        assert_eq!(status["users"][0]["backend"], json!("lobby"));
    }
}
