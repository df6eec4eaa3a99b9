//! Same-host channel built from named pipes.
//!
//! A listener owns an accept pipe at `<dir>/<port>.fifo`. A client creates
//! an `up` pipe (client to server) and a `down` pipe (server to client),
//! then writes one request line naming both. The handshake is:
//!
//! 1. client opens `down` for reading and posts `"<up>\t<down>\n"`;
//! 2. server opens `up` for reading, `down` for writing, sends one ack byte;
//! 3. client opens `up` for writing and answers with one hello byte.
//!
//! Both sides then hold distinct read and write descriptors. The client
//! unlinks the pipe names once both ends are open.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{ConnectConfig, ListenConfig};
use crate::connection::Connection;
use crate::error::{Result, TransportError};
use crate::io;
use crate::poll::wait_readable;
use crate::stream::IpcStream;
use crate::uds::{check_path_len, ensure_local_dir};

const ACK: u8 = 0x06;
const MAX_REQUEST_LINE: usize = 512;

static NEXT_PIPE_PAIR: AtomicU64 = AtomicU64::new(0);

/// Path of the accept pipe a module listening on `port` publishes.
pub fn accept_path(dir: &Path, port: u16) -> PathBuf {
    dir.join(format!("{port}.fifo"))
}

/// Listener side of the pipe transport.
pub struct FifoListener {
    accept: File,
    path: PathBuf,
    dir: PathBuf,
    handshake_timeout: Duration,
    pending: Mutex<Vec<u8>>,
}

impl FifoListener {
    /// Create (or reuse) the accept pipe for `port`.
    pub fn bind_port(port: u16, config: &ListenConfig) -> Result<Self> {
        ensure_local_dir(&config.local_dir, config.dir_mode);
        let path = accept_path(&config.local_dir, port);
        check_path_len(&path)?;
        let bind_err = |source: std::io::Error| TransportError::Bind {
            addr: path.display().to_string(),
            source,
        };

        match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.file_type().is_fifo() => {
                debug!(?path, "reusing existing accept pipe");
            }
            Ok(_) => {
                return Err(bind_err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "existing path is not a fifo",
                )));
            }
            Err(_) => {
                make_fifo(&path, 0o622).map_err(bind_err)?;
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o622))
                    .map_err(bind_err)?;
            }
        }

        // Read-write so the pipe never reports end-of-file between clients.
        let accept = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(bind_err)?;

        info!(?path, "listening on accept pipe");
        Ok(Self {
            accept,
            dir: config.local_dir.clone(),
            path,
            handshake_timeout: config.pipe_handshake_timeout,
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn accept_file(&self) -> &File {
        &self.accept
    }

    /// Complete the handshake for one queued request, if any.
    ///
    /// Returns `Ok(None)` when no full request line is available yet.
    pub fn try_accept(&self) -> Result<Option<Connection>> {
        let Some(line) = self.next_request()? else {
            return Ok(None);
        };
        let (up, down) = self.parse_request(&line)?;

        let reader = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&up)
            .map_err(TransportError::Accept)?;
        let mut writer = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&down)
            .map_err(TransportError::Accept)?;

        writer.write_all(&[ACK]).map_err(TransportError::Accept)?;
        let mut reader = reader;
        wait_for_byte(&mut reader, self.handshake_timeout)?;

        set_blocking(&reader)?;
        set_blocking(&writer)?;
        debug!(?up, ?down, "accepted pipe connection");
        Ok(Some(Connection::from_halves(
            IpcStream::from_pipe(reader),
            IpcStream::from_pipe(writer),
            format!("pipe://{}", up.display()),
        )))
    }

    fn next_request(&self) -> Result<Option<Vec<u8>>> {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut chunk = [0u8; MAX_REQUEST_LINE];
        loop {
            if let Some(end) = pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = pending.drain(..=end).collect();
                return Ok(Some(line));
            }
            match (&self.accept).read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => pending.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(err) => return Err(TransportError::Accept(err)),
            }
            if pending.len() > MAX_REQUEST_LINE {
                warn!(path = ?self.path, "discarding oversized pipe request");
                pending.clear();
            }
        }
    }

    fn parse_request(&self, line: &[u8]) -> Result<(PathBuf, PathBuf)> {
        let invalid = || {
            TransportError::Accept(std::io::Error::new(
                ErrorKind::InvalidData,
                "malformed pipe connection request",
            ))
        };
        let text = std::str::from_utf8(line).map_err(|_| invalid())?.trim_end();
        let (up, down) = text.split_once('\t').ok_or_else(invalid)?;
        let (up, down) = (PathBuf::from(up), PathBuf::from(down));
        // Only pipes inside our own endpoint directory are opened.
        if up.parent() != Some(self.dir.as_path()) || down.parent() != Some(self.dir.as_path()) {
            return Err(invalid());
        }
        Ok((up, down))
    }
}

impl Drop for FifoListener {
    fn drop(&mut self) {
        debug!(path = ?self.path, "removing accept pipe");
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Connect to a same-host module through its accept pipe.
///
/// Fails fast with a connect error when nobody is listening on `port`.
pub fn connect_fifo(port: u16, config: &ConnectConfig) -> Result<Connection> {
    let accept = accept_path(&config.local_dir, port);
    let connect_err = |source: std::io::Error| TransportError::Connect {
        target: accept.display().to_string(),
        source,
    };

    let serial = NEXT_PIPE_PAIR.fetch_add(1, Ordering::Relaxed);
    let stem = format!("{port}.{}.{serial}", std::process::id());
    let up = config.local_dir.join(format!("{stem}.up"));
    let down = config.local_dir.join(format!("{stem}.down"));
    check_path_len(&up)?;
    check_path_len(&down)?;

    let _names = PipeNames::create(&up, &down).map_err(connect_err)?;

    let mut reader = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(&down)
        .map_err(connect_err)?;

    // With no reader on the accept pipe this fails with ENXIO.
    let mut request = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(&accept)
        .map_err(connect_err)?;
    let line = format!("{}\t{}\n", up.display(), down.display());
    io::write_all(&mut request, line.as_bytes())?;
    drop(request);

    wait_for_byte(&mut reader, config.pipe_handshake_timeout)?;

    let mut writer = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(&up)
        .map_err(connect_err)?;
    writer.write_all(&[ACK]).map_err(connect_err)?;

    set_blocking(&reader)?;
    set_blocking(&writer)?;
    debug!(?accept, "connected over pipes");
    Ok(Connection::from_halves(
        IpcStream::from_pipe(reader),
        IpcStream::from_pipe(writer),
        format!("pipe://{}", accept.display()),
    ))
}

/// Unlinks a client's pipe names when the connect attempt ends.
struct PipeNames<'a> {
    up: &'a Path,
    down: &'a Path,
}

impl<'a> PipeNames<'a> {
    fn create(up: &'a Path, down: &'a Path) -> std::io::Result<Self> {
        make_fifo(up, 0o600)?;
        if let Err(err) = make_fifo(down, 0o600) {
            let _ = std::fs::remove_file(up);
            return Err(err);
        }
        Ok(Self { up, down })
    }
}

impl Drop for PipeNames<'_> {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.up);
        let _ = std::fs::remove_file(self.down);
    }
}

fn make_fifo(path: &Path, mode: libc::mode_t) -> std::io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|err| std::io::Error::new(ErrorKind::InvalidInput, err))?;
    // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), mode) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

fn set_blocking(file: &File) -> Result<()> {
    let fd = file.as_raw_fd();
    // SAFETY: `fd` belongs to `file`, which is open for the duration of both calls.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    // SAFETY: as above; only the O_NONBLOCK bit is cleared.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

fn wait_for_byte(file: &mut File, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut byte = [0u8; 1];
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        if wait_readable(&[file.as_raw_fd()], Some(left))?.is_none() {
            return Err(TransportError::Connect {
                target: "pipe handshake".to_string(),
                source: std::io::Error::from(ErrorKind::TimedOut),
            });
        }
        match file.read(&mut byte) {
            Ok(1) => return Ok(()),
            Ok(_) => {
                return Err(TransportError::Eof {
                    expected: 1,
                    received: 0,
                })
            }
            Err(err)
                if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) =>
            {
                continue
            }
            Err(err) => return Err(err.into()),
        }
    }
}
