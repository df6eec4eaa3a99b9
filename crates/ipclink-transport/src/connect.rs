use std::ffi::CStr;
use std::str::FromStr;

use tracing::debug;

use crate::config::{ConnectConfig, LocalTransport, DEFAULT_PORT};
use crate::connection::Connection;
use crate::error::{Result, TransportError};
use crate::fifo::connect_fifo;
use crate::tcp::connect_tcp;
use crate::uds::connect_unix;

/// A `host` or `host:port` destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host` or `host:port`; a missing port means [`DEFAULT_PORT`].
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = || TransportError::InvalidTarget(input.to_string());
        let (host, port) = match input.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (input, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(host, port))
    }
}

impl FromStr for Target {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// This machine's host name.
pub fn hostname() -> Result<String> {
    let mut buf = [0u8; 256];
    // SAFETY: `buf` is writable for its full length; the length passed leaves
    // room for the NUL terminator written below.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len() - 1) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    buf[buf.len() - 1] = 0;
    let name = CStr::from_bytes_until_nul(&buf)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    Ok(name.to_string_lossy().into_owned())
}

/// Whether `machine` names the host called `this_host`.
///
/// Matches exactly, or when `machine` is the leading label of a dotted
/// `this_host` (`"alpha"` matches `"alpha.lab.example"`).
pub fn is_local_host(machine: &str, this_host: &str) -> bool {
    machine == this_host
        || this_host
            .strip_prefix(machine)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Open a same-host channel to the module listening on `port`.
pub fn connect_local(port: u16, config: &ConnectConfig) -> Result<Connection> {
    match config.local_transport {
        LocalTransport::UnixSocket => connect_unix(port, config),
        LocalTransport::Fifo => connect_fifo(port, config),
    }
}

/// Connect to `target`, preferring a same-host channel.
///
/// When the target host is this machine the local channel is tried first;
/// if that fails the same call falls back to TCP.
pub fn connect(target: &Target, config: &ConnectConfig) -> Result<Connection> {
    if config.prefer_local {
        let this_host = match &config.local_hostname {
            Some(name) => name.clone(),
            None => hostname()?,
        };
        if is_local_host(&target.host, &this_host) {
            match connect_local(target.port, config) {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    debug!(%target, %err, "local channel unavailable, falling back to tcp")
                }
            }
        }
    }
    connect_tcp(&target.host, target.port, config)
}
