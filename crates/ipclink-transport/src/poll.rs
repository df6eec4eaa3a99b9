use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Wait until one of `fds` is readable (or hung up).
///
/// Returns the index of the first ready descriptor, or `None` when the
/// timeout elapses. `None` as the timeout waits forever. Interrupted waits
/// resume with the remaining time.
pub fn wait_readable(fds: &[RawFd], timeout: Option<Duration>) -> Result<Option<usize>> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    loop {
        let wait_ms = match deadline {
            None => -1,
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                // Round up so a sub-millisecond remainder still waits.
                left.as_millis()
                    .saturating_add(u128::from(left.subsec_nanos() % 1_000_000 != 0))
                    .min(i32::MAX as u128) as i32
            }
        };

        // SAFETY: `pollfds` is a live, correctly sized array of `pollfd`
        // structs for the duration of the call.
        let rc = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                wait_ms,
            )
        };

        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }
        if rc == 0 {
            return Ok(None);
        }
        let ready = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
        if let Some(index) = pollfds.iter().position(|p| p.revents & ready != 0) {
            return Ok(Some(index));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn times_out_when_nothing_arrives() {
        let (a, _b) = UnixStream::pair().expect("pair should be creatable");
        let start = Instant::now();
        let ready = wait_readable(&[a.as_raw_fd()], Some(Duration::from_millis(30)))
            .expect("poll should succeed");
        assert!(ready.is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn reports_ready_index() {
        let (a, _b) = UnixStream::pair().expect("pair should be creatable");
        let (c, mut d) = UnixStream::pair().expect("pair should be creatable");
        d.write_all(b"x").expect("write should succeed");
        let ready = wait_readable(&[a.as_raw_fd(), c.as_raw_fd()], Some(Duration::ZERO))
            .expect("poll should succeed");
        assert_eq!(ready, Some(1));
    }
}
