use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::close;
use nix::NixPath;
use std::fmt;
use std::os::unix::io::RawFd;

/// An owned fd, closed on drop. Closed state is represented as -1 so a
/// default-constructed ScopedFd is safely inert.
pub struct ScopedFd {
    fd: RawFd,
}

impl ScopedFd {
    pub fn new() -> ScopedFd {
        ScopedFd { fd: -1 }
    }

    pub fn from_raw(fd: RawFd) -> ScopedFd {
        ScopedFd { fd }
    }

    pub fn open_path<P: ?Sized + NixPath>(path: &P, oflag: OFlag) -> nix::Result<ScopedFd> {
        let fd = open(path, oflag, Mode::empty())?;
        Ok(ScopedFd { fd })
    }

    pub fn is_open(&self) -> bool {
        self.fd >= 0
    }

    pub fn as_raw(&self) -> RawFd {
        self.fd
    }

    /// Relinquish ownership; the caller is now responsible for closing.
    pub fn extract(&mut self) -> RawFd {
        let fd = self.fd;
        self.fd = -1;
        fd
    }

    pub fn close(&mut self) {
        if self.fd >= 0 {
            // The fd might already be gone, e.g. closed by an execve.
            close(self.fd).unwrap_or(());
        }
        self.fd = -1;
    }
}

impl Default for ScopedFd {
    fn default() -> Self {
        ScopedFd::new()
    }
}

impl Drop for ScopedFd {
    fn drop(&mut self) {
        self.close()
    }
}

impl fmt::Debug for ScopedFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopedFd({})", self.fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_closed() {
        let fd = ScopedFd::new();
        assert!(!fd.is_open());
        assert_eq!(-1, fd.as_raw());
    }

    #[test]
    fn extract_relinquishes() {
        let mut fd = ScopedFd::from_raw(42);
        assert!(fd.is_open());
        assert_eq!(42, fd.extract());
        assert!(!fd.is_open());
        // Drop must not try to close 42; extract() already disowned it.
    }
}
