//! IPC server: Unix socket listener + per-client state + message framing.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction};
use tracing::{debug, error, info, warn};

use super::dispatch;
use crate::state::AacState;

/// Maximum message payload size (1 MiB).
const MAX_MESSAGE_SIZE: u32 = 1_048_576;

/// Maximum write buffer before dropping old events (64 KiB).
const MAX_WRITE_BUFFER: usize = 65_536;

/// Default rate limit: messages per second per client.
const DEFAULT_RATE_LIMIT: u32 = 200;

/// Rate limit window duration in seconds.
const RATE_LIMIT_WINDOW_SECS: u64 = 1;

/// Per-client rate limiter.
pub struct RateLimiter {
    window_start: Instant,
    message_count: u32,
    pub max_per_second: u32,
}

impl RateLimiter {
    fn new(max_per_second: u32) -> Self {
        Self {
            window_start: Instant::now(),
            message_count: 0,
            max_per_second,
        }
    }

    /// Check if a message is allowed.  Returns true if within rate limit.
    fn check(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.window_start);
        if elapsed.as_secs() >= RATE_LIMIT_WINDOW_SECS {
            self.window_start = now;
            self.message_count = 1;
            true
        } else {
            self.message_count += 1;
            self.message_count <= self.max_per_second
        }
    }
}

/// Read peer credentials from a Unix socket using SO_PEERCRED (Linux)
/// or return None on unsupported platforms.
fn get_peer_cred(stream: &UnixStream) -> Option<(Option<u32>, Option<i32>)> {
    #[cfg(target_os = "linux")]
    {
        let fd = stream.as_raw_fd();
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                &mut cred as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if ret == 0 {
            Some((Some(cred.uid), Some(cred.pid)))
        } else {
            None
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = stream;
        Some((None, None))
    }
}

/// Per-client IPC connection state.
pub struct IpcClient {
    pub stream: UnixStream,
    pub read_buf: Vec<u8>,
    pub write_buf: Vec<u8>,
    pub authenticated: bool,
    pub id: u64,
    /// Name given in the hello handshake.
    pub name: Option<String>,
    /// Peer UID from SO_PEERCRED (Unix only).
    pub peer_uid: Option<u32>,
    /// Peer PID from SO_PEERCRED (Unix only).
    pub peer_pid: Option<i32>,
    pub rate_limiter: RateLimiter,
    /// Set when the peer violated framing; the client is dropped.
    pub protocol_error: bool,
}

impl IpcClient {
    fn new(stream: UnixStream, id: u64) -> Self {
        stream.set_nonblocking(true).ok();

        let (peer_uid, peer_pid) = get_peer_cred(&stream).unwrap_or_else(|| {
            warn!(id, "failed to read peer credentials");
            (None, None)
        });

        if let Some(uid) = peer_uid {
            debug!(id, peer_uid = uid, peer_pid = ?peer_pid, "peer credentials");
        }

        Self {
            stream,
            read_buf: Vec::with_capacity(4096),
            write_buf: Vec::new(),
            authenticated: false,
            id,
            name: None,
            peer_uid,
            peer_pid,
            rate_limiter: RateLimiter::new(DEFAULT_RATE_LIMIT),
            protocol_error: false,
        }
    }

    /// Attempt to flush pending writes.
    pub fn flush_writes(&mut self) -> io::Result<()> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write zero")),
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Enqueue a framed message (length prefix + payload) for sending.
    pub fn enqueue_message(&mut self, payload: &str) {
        let bytes = payload.as_bytes();
        let len = bytes.len() as u32;
        self.write_buf.extend_from_slice(&len.to_be_bytes());
        self.write_buf.extend_from_slice(bytes);
    }

    /// Enqueue an event, applying backpressure if buffer is too large.
    pub fn enqueue_event(&mut self, payload: &str) {
        if self.write_buf.len() > MAX_WRITE_BUFFER {
            warn!(client_id = self.id, "write buffer overflow, dropping event");
            return;
        }
        self.enqueue_message(payload);
    }

    /// Extract complete framed messages from the read buffer.
    pub fn extract_messages(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while self.read_buf.len() >= 4 {
            let len = u32::from_be_bytes([
                self.read_buf[0],
                self.read_buf[1],
                self.read_buf[2],
                self.read_buf[3],
            ]);
            if len > MAX_MESSAGE_SIZE {
                error!(client_id = self.id, len, "message exceeds maximum size");
                self.read_buf.clear();
                self.protocol_error = true;
                break;
            }
            let total = 4 + len as usize;
            if self.read_buf.len() < total {
                break;
            }
            let payload = String::from_utf8_lossy(&self.read_buf[4..total]).to_string();
            self.read_buf.drain(..total);
            messages.push(payload);
        }
        messages
    }

    /// Read whatever is available, at most one maximal frame per pass.
    /// `Err` means the peer is gone.
    fn fill_read_buf(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 4096];
        while self.read_buf.len() <= 4 + MAX_MESSAGE_SIZE as usize {
            match self.stream.read(&mut buf) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::ConnectionReset, "eof")),
                Ok(n) => {
                    self.read_buf.extend_from_slice(&buf[..n]);
                    if n < buf.len() {
                        return Ok(());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// IPC server managing the listener socket and all client connections.
pub struct IpcServer {
    pub socket_path: PathBuf,
    pub clients: HashMap<u64, IpcClient>,
    next_client_id: u64,
    pub ipc_trace: bool,
}

impl IpcServer {
    /// Create IPC server (does not bind yet; call `bind` after).
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            clients: HashMap::new(),
            next_client_id: 1,
            ipc_trace: false,
        }
    }

    /// Compute the default socket path.
    pub fn default_socket_path() -> PathBuf {
        let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
            .unwrap_or_else(|_| format!("/tmp/aacd-{}", unsafe { libc::getuid() }));
        PathBuf::from(runtime_dir).join("aacd-ipc.sock")
    }

    /// Bind the listener socket and register with calloop.
    pub fn bind(socket_path: &Path, loop_handle: &LoopHandle<'static, AacState>) -> anyhow::Result<()> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .with_context(|| format!("removing stale socket {}", socket_path.display()))?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("binding {}", socket_path.display()))?;
        listener.set_nonblocking(true)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o700))?;
        }

        info!(?socket_path, "IPC server listening");

        let source = Generic::new(listener, Interest::READ, Mode::Level);
        loop_handle
            .insert_source(source, |_event, listener, state| {
                loop {
                    match listener.accept() {
                        Ok((stream, _addr)) => {
                            state.ipc_server.accept(stream);
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            error!("accept error: {}", e);
                            break;
                        }
                    }
                }
                Ok(PostAction::Continue)
            })
            .map_err(|e| anyhow::anyhow!("failed to register IPC listener: {}", e.error))?;

        Ok(())
    }

    /// Register a freshly accepted connection.
    pub fn accept(&mut self, stream: UnixStream) -> u64 {
        let client_id = self.next_client_id;
        self.next_client_id += 1;
        info!(client_id, "IPC client connected");
        self.clients.insert(client_id, IpcClient::new(stream, client_id));
        client_id
    }

    /// Poll all clients for readable data, dispatch messages, flush writes.
    /// Called once per event loop iteration.
    pub fn poll_clients(state: &mut AacState) {
        let client_ids: Vec<u64> = state.ipc_server.clients.keys().copied().collect();
        let mut disconnected = Vec::new();

        for client_id in client_ids {
            let (read_result, messages) = match state.ipc_server.clients.get_mut(&client_id) {
                Some(client) => {
                    let read = client.fill_read_buf();
                    (read, client.extract_messages())
                }
                None => continue,
            };

            for msg_str in messages {
                let rate_ok = state
                    .ipc_server
                    .clients
                    .get_mut(&client_id)
                    .map(|c| c.rate_limiter.check())
                    .unwrap_or(false);

                if !rate_ok {
                    warn!(client_id, "rate limit exceeded, dropping message");
                    if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
                        client.enqueue_message(
                            "(:type :response :id 0 :status :error :reason \"rate limit exceeded\")",
                        );
                    }
                    continue;
                }

                if state.ipc_server.ipc_trace {
                    info!(client_id, "<< {}", msg_str);
                }
                let response = dispatch::handle_message(state, client_id, &msg_str);
                if let Some(ref resp) = response {
                    if state.ipc_server.ipc_trace {
                        info!(client_id, ">> {}", resp);
                    }
                    if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
                        client.enqueue_message(resp);
                    }
                }
                for event in state.take_pending_events() {
                    Self::broadcast_event(state, &event);
                }
            }

            if let Err(e) = read_result {
                debug!(client_id, "client disconnected: {}", e);
                disconnected.push(client_id);
                continue;
            }

            if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
                if client.protocol_error {
                    disconnected.push(client_id);
                } else if let Err(e) = client.flush_writes() {
                    debug!(client_id, "write error: {}", e);
                    disconnected.push(client_id);
                }
            }
        }

        for id in disconnected {
            info!(client_id = id, "removing disconnected IPC client");
            state.ipc_server.clients.remove(&id);
        }

        // Broadcasts queued for clients polled earlier in this pass.
        for client in state.ipc_server.clients.values_mut() {
            if let Err(e) = client.flush_writes() {
                debug!(client_id = client.id, "write error: {}", e);
            }
        }
    }

    /// Broadcast an event to all authenticated clients.
    pub fn broadcast_event(state: &mut AacState, event: &str) {
        if state.ipc_server.ipc_trace {
            info!("broadcast >> {}", event);
        }
        for client in state.ipc_server.clients.values_mut() {
            if client.authenticated {
                client.enqueue_event(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_client() -> (IpcClient, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        (IpcClient::new(ours, 1), theirs)
    }

    fn frame(payload: &str) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload.as_bytes());
        out
    }

    #[test]
    fn test_extract_split_and_joined_messages() {
        let (mut client, _peer) = make_client();
        let mut bytes = frame("(:type :ping)");
        bytes.extend(frame("(:type :mode-status)"));
        let (first, rest) = bytes.split_at(6);

        client.read_buf.extend_from_slice(first);
        assert!(client.extract_messages().is_empty());

        client.read_buf.extend_from_slice(rest);
        assert_eq!(
            client.extract_messages(),
            vec!["(:type :ping)".to_string(), "(:type :mode-status)".to_string()]
        );
        assert!(client.read_buf.is_empty());
    }

    #[test]
    fn test_oversized_message_flags_client() {
        let (mut client, _peer) = make_client();
        client
            .read_buf
            .extend_from_slice(&(MAX_MESSAGE_SIZE + 1).to_be_bytes());
        assert!(client.extract_messages().is_empty());
        assert!(client.protocol_error);
        assert!(client.read_buf.is_empty());
    }

    #[test]
    fn test_listener_registers_connections() {
        let path = std::env::temp_dir().join(format!("aacd-accept-{}.sock", std::process::id()));
        let mut event_loop = calloop::EventLoop::<AacState>::try_new().unwrap();
        let mut state = AacState::new(crate::config::AacConfig::default(), path.clone());
        IpcServer::bind(&path, &event_loop.handle()).unwrap();

        let _peer = UnixStream::connect(&path).unwrap();
        event_loop
            .dispatch(Some(std::time::Duration::from_millis(200)), &mut state)
            .unwrap();
        assert_eq!(state.ipc_server.clients.len(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_read_stops_at_one_full_frame() {
        let (mut client, mut peer) = make_client();
        peer.write_all(b"more").unwrap();
        client.read_buf = vec![0u8; 4 + MAX_MESSAGE_SIZE as usize + 1];
        client.fill_read_buf().unwrap();
        assert_eq!(client.read_buf.len(), 4 + MAX_MESSAGE_SIZE as usize + 1);

        client.read_buf.clear();
        client.fill_read_buf().unwrap();
        assert_eq!(client.read_buf, b"more");
    }

    #[test]
    fn test_enqueue_and_flush_roundtrip() {
        let (mut client, mut peer) = make_client();
        client.enqueue_message("(:type :response :id 1 :status :ok)");
        client.flush_writes().unwrap();
        assert!(client.write_buf.is_empty());

        let mut len = [0u8; 4];
        peer.read_exact(&mut len).unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
        peer.read_exact(&mut payload).unwrap();
        assert_eq!(payload, b"(:type :response :id 1 :status :ok)");
    }

    #[test]
    fn test_event_backpressure() {
        let (mut client, _peer) = make_client();
        client.write_buf = vec![0u8; MAX_WRITE_BUFFER + 1];
        client.enqueue_event("(:type :event :event :hover :index nil)");
        assert_eq!(client.write_buf.len(), MAX_WRITE_BUFFER + 1);
    }

    #[test]
    fn test_rate_limiter_window() {
        let mut limiter = RateLimiter::new(3);
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());
    }

    #[test]
    fn test_peer_credentials_match_process() {
        let (client, _peer) = make_client();
        #[cfg(target_os = "linux")]
        assert_eq!(client.peer_uid, Some(unsafe { libc::getuid() }));
        assert!(!client.authenticated);
    }
}
