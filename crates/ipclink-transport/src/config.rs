use std::path::PathBuf;
use std::time::Duration;

/// Port a module uses to reach the router when none is given.
pub const DEFAULT_PORT: u16 = 1381;

/// Send and receive buffer size applied to every socket: 32 KiB.
pub const DEFAULT_SOCKET_BUFFER: usize = 32 * 1024;

/// Directory holding same-host socket and pipe endpoints.
pub const DEFAULT_LOCAL_DIR: &str = "/tmp/ipclink";

/// Pending connection queue length for listeners.
pub const DEFAULT_BACKLOG: i32 = 5;

/// Mode for created Unix socket files. Open to all users so any module on
/// the host can connect, and can remove a stale socket after a crash.
pub const DEFAULT_SOCKET_MODE: u32 = 0o777;

/// Mode for the local endpoint directory (world-writable, sticky).
pub const DEFAULT_DIR_MODE: u32 = 0o1777;

/// How long a pipe handshake may take before the attempt is abandoned.
pub const DEFAULT_PIPE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Same-host channel flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalTransport {
    /// Unix domain stream socket at `<dir>/<port>`.
    #[default]
    UnixSocket,
    /// Named pipe pair negotiated through `<dir>/<port>.fifo`.
    Fifo,
}

/// Client-side connection settings.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// `SO_SNDBUF`/`SO_RCVBUF` for TCP connections.
    pub tcp_buffer_size: usize,
    /// `SO_SNDBUF`/`SO_RCVBUF` for Unix domain connections.
    pub local_buffer_size: usize,
    /// Directory where same-host listeners publish their endpoints.
    pub local_dir: PathBuf,
    /// Try a same-host channel first when the target names this machine.
    pub prefer_local: bool,
    pub local_transport: LocalTransport,
    /// Overrides the name returned by `gethostname` for same-host detection.
    pub local_hostname: Option<String>,
    pub pipe_handshake_timeout: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            tcp_buffer_size: DEFAULT_SOCKET_BUFFER,
            local_buffer_size: DEFAULT_SOCKET_BUFFER,
            local_dir: PathBuf::from(DEFAULT_LOCAL_DIR),
            prefer_local: true,
            local_transport: LocalTransport::default(),
            local_hostname: None,
            pipe_handshake_timeout: DEFAULT_PIPE_HANDSHAKE_TIMEOUT,
        }
    }
}

impl ConnectConfig {
    pub fn with_local_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_dir = dir.into();
        self
    }

    pub fn with_local_transport(mut self, transport: LocalTransport) -> Self {
        self.local_transport = transport;
        self
    }

    pub fn with_local_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.local_hostname = Some(hostname.into());
        self
    }
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub backlog: i32,
    pub tcp_buffer_size: usize,
    pub local_buffer_size: usize,
    pub local_dir: PathBuf,
    /// Also accept same-host connections next to the TCP socket.
    pub local: bool,
    pub local_transport: LocalTransport,
    pub socket_mode: u32,
    pub dir_mode: u32,
    pub pipe_handshake_timeout: Duration,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            tcp_buffer_size: DEFAULT_SOCKET_BUFFER,
            local_buffer_size: DEFAULT_SOCKET_BUFFER,
            local_dir: PathBuf::from(DEFAULT_LOCAL_DIR),
            local: true,
            local_transport: LocalTransport::default(),
            socket_mode: DEFAULT_SOCKET_MODE,
            dir_mode: DEFAULT_DIR_MODE,
            pipe_handshake_timeout: DEFAULT_PIPE_HANDSHAKE_TIMEOUT,
        }
    }
}

impl ListenConfig {
    pub fn with_local_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_dir = dir.into();
        self
    }

    pub fn with_local_transport(mut self, transport: LocalTransport) -> Self {
        self.local_transport = transport;
        self
    }

    /// Listen on TCP only.
    pub fn without_local(mut self) -> Self {
        self.local = false;
        self
    }
}
