use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use socket2::SockRef;
use tracing::{debug, info, warn};

use crate::config::{ConnectConfig, ListenConfig};
use crate::connection::Connection;
use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// Maximum socket path length.
/// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// Path of the Unix socket a module listening on `port` publishes.
pub fn socket_path(dir: &Path, port: u16) -> PathBuf {
    dir.join(port.to_string())
}

/// Create the local endpoint directory if it does not exist yet.
///
/// The mode is applied explicitly afterwards so the process umask does not
/// narrow it. Failure is only logged; the following bind reports the error.
pub fn ensure_local_dir(dir: &Path, mode: u32) {
    if dir.is_dir() {
        return;
    }
    match std::fs::DirBuilder::new().recursive(true).mode(mode).create(dir) {
        Ok(()) => {
            if let Err(err) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode)) {
                warn!(?dir, %err, "could not set local socket directory mode");
            }
        }
        Err(err) => warn!(?dir, %err, "could not create local socket directory"),
    }
}

pub(crate) fn check_path_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: MAX_PATH_LEN,
        });
    }
    Ok(())
}

/// Same-host listener on a filesystem Unix domain socket.
///
/// The socket file is removed on drop, but only if it is still the one this
/// listener created.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
    buffer_size: usize,
}

impl UnixDomainSocket {
    /// Listen at `<dir>/<port>`.
    pub fn bind_port(port: u16, config: &ListenConfig) -> Result<Self> {
        ensure_local_dir(&config.local_dir, config.dir_mode);
        Self::bind_with_mode(
            socket_path(&config.local_dir, port),
            config.socket_mode,
            config.local_buffer_size,
        )
    }

    /// Bind at an explicit path with an explicit file mode.
    ///
    /// A stale socket at `path` is unlinked first. Anything other than a
    /// socket is left alone and the bind fails.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32, buffer_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        check_path_len(&path)?;
        let bind_err = |source: std::io::Error| TransportError::Bind {
            addr: path.display().to_string(),
            source,
        };

        match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.file_type().is_socket() => {
                debug!(?path, "removing stale socket");
                if let Err(err) = std::fs::remove_file(&path) {
                    if err.kind() != ErrorKind::NotFound {
                        warn!(?path, %err, "could not unlink stale socket");
                    }
                }
            }
            Ok(_) => {
                return Err(bind_err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(?path, %err, "could not inspect socket path"),
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            listener,
            created_inode: (created.dev(), created.ino()),
            path,
            buffer_size,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<Connection> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        apply_buffer_size(&stream, self.buffer_size)?;
        debug!(path = ?self.path, "accepted unix connection");
        Connection::from_socket(
            IpcStream::from_unix(stream),
            format!("unix://{}", self.path.display()),
        )
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn listener(&self) -> &UnixListener {
        &self.listener
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let (expected_dev, expected_ino) = self.created_inode;
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(
                    path = ?self.path,
                    "socket path identity changed; skipping cleanup"
                );
            }
        }
    }
}

/// Connect to the Unix socket a same-host module publishes for `port`.
pub fn connect_unix(port: u16, config: &ConnectConfig) -> Result<Connection> {
    let path = socket_path(&config.local_dir, port);
    check_path_len(&path)?;
    let stream = UnixStream::connect(&path).map_err(|source| TransportError::Connect {
        target: path.display().to_string(),
        source,
    })?;
    apply_buffer_size(&stream, config.local_buffer_size)?;
    debug!(?path, "connected to unix domain socket");
    Connection::from_socket(
        IpcStream::from_unix(stream),
        format!("unix://{}", path.display()),
    )
}

fn apply_buffer_size(stream: &UnixStream, size: usize) -> Result<()> {
    let sock = SockRef::from(stream);
    sock.set_send_buffer_size(size)?;
    sock.set_recv_buffer_size(size)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/ipcl-uds-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    #[test]
    fn bind_accept_connect() {
        let dir = temp_dir("accept");
        let listen = ListenConfig::default().with_local_dir(&dir);
        let connect = ConnectConfig::default().with_local_dir(&dir);

        let listener = UnixDomainSocket::bind_port(4100, &listen).expect("bind should succeed");
        assert!(dir.join("4100").exists());

        let handle = std::thread::spawn(move || {
            let client = connect_unix(4100, &connect).expect("client should connect");
            client.write_all(b"hello").expect("write should succeed");
        });

        let server = listener.accept().expect("accept should succeed");
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).expect("read should succeed");
        assert_eq!(&buf, b"hello");
        handle.join().expect("client thread should not panic");

        drop(listener);
        assert!(
            !dir.join("4100").exists(),
            "socket file should be cleaned up on drop"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn creates_missing_directory_with_mode() {
        let parent = temp_dir("mkdir");
        let dir = parent.join("nested");
        let listen = ListenConfig::default().with_local_dir(&dir);

        let listener = UnixDomainSocket::bind_port(4101, &listen).expect("bind should succeed");
        let mode = std::fs::metadata(&dir)
            .expect("dir should exist")
            .permissions()
            .mode()
            & 0o7777;
        assert_eq!(mode, 0o1777);
        let sock_mode = std::fs::metadata(listener.path())
            .expect("socket should exist")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(sock_mode, 0o777);

        drop(listener);
        let _ = std::fs::remove_dir_all(&parent);
    }

    #[test]
    fn stale_socket_is_replaced() {
        let dir = temp_dir("stale");
        let path = dir.join("stale.sock");
        let stale = UnixListener::bind(&path).expect("stale socket should bind");
        drop(stale);
        assert!(path.exists());

        let listener =
            UnixDomainSocket::bind_with_mode(&path, 0o600, 4096).expect("rebind should succeed");
        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UnixDomainSocket::bind_with_mode(&long_path, 0o600, 4096);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn rejects_existing_non_socket_file() {
        let dir = temp_dir("file");
        let path = dir.join("not-a-socket");
        std::fs::write(&path, b"regular-file").expect("file should be writable");

        let result = UnixDomainSocket::bind_with_mode(&path, 0o600, 4096);
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn drop_does_not_remove_replaced_path() {
        let dir = temp_dir("drop-race");
        let path = dir.join("drop.sock");

        let listener =
            UnixDomainSocket::bind_with_mode(&path, 0o600, 4096).expect("bind should succeed");
        std::fs::remove_file(&path).expect("socket should be removable");
        std::fs::write(&path, b"replacement-file").expect("file should be writable");

        drop(listener);
        assert!(
            path.exists(),
            "drop must not remove path if inode identity changed"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_without_listener_fails() {
        let dir = temp_dir("absent");
        let config = ConnectConfig::default().with_local_dir(&dir);
        let err = connect_unix(4102, &config).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
