use crate::flog::{flog, Flog};
use raw_pipe::make_raw_pipes;
use libc::{c_int, FD_CLOEXEC, F_GETFD, F_GETFL, F_SETFD, F_SETFL, O_NONBLOCK};
use nix::fcntl::FcntlArg;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// The first "high fd". Pipe ends are moved at or above it, so that rewiring a child's stdin and
/// stdout can never land on top of one of them.
pub const FIRST_HIGH_FD: RawFd = 10;

/// Helper type returned from make_autoclose_pipes.
#[derive(Debug)]
pub struct AutoClosePipes {
    /// Read end of the pipe.
    pub read: OwnedFd,

    /// Write end of the pipe.
    pub write: OwnedFd,
}

#[cfg(have_pipe2)]
mod raw_pipe {
    use nix::fcntl::OFlag;
    use std::os::fd::OwnedFd;

    /// Return the pipe ends and whether they already have CLOEXEC set.
    pub fn make_raw_pipes() -> nix::Result<(OwnedFd, OwnedFd, bool)> {
        let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)?;
        Ok((read, write, true))
    }
}

#[cfg(not(have_pipe2))]
mod raw_pipe {
    use std::os::fd::OwnedFd;

    pub fn make_raw_pipes() -> nix::Result<(OwnedFd, OwnedFd, bool)> {
        let (read, write) = nix::unistd::pipe()?;
        Ok((read, write, false))
    }
}

/// Construct a pair of connected pipes, set to close-on-exec and moved into the high fd range.
/// Errors are logged here and returned.
pub fn make_autoclose_pipes(flog: &Flog) -> nix::Result<AutoClosePipes> {
    let (readp, writep, already_cloexec) = match make_raw_pipes() {
        Ok(pipes) => pipes,
        Err(err) => {
            flog!(flog, warning, "An error occurred while setting up pipe:", err);
            return Err(err);
        }
    };

    let readp = heightenize_fd(flog, readp, already_cloexec)?;
    let writep = heightenize_fd(flog, writep, already_cloexec)?;

    Ok(AutoClosePipes {
        read: readp,
        write: writep,
    })
}

/// If the given fd is in the "user range", move it to a new fd in the "high range".
/// zsh calls this movefd().
/// `input_has_cloexec` describes whether the input has CLOEXEC already set, so we can avoid
/// setting it again.
/// Return the fd, which always has CLOEXEC set. On failure the input fd is closed.
fn heightenize_fd(flog: &Flog, fd: OwnedFd, input_has_cloexec: bool) -> nix::Result<OwnedFd> {
    let raw_fd = fd.as_raw_fd();

    if raw_fd >= FIRST_HIGH_FD {
        if !input_has_cloexec && set_cloexec(raw_fd, true) < 0 {
            let err = nix::Error::last();
            flog!(flog, warning, "fcntl(FD_CLOEXEC):", err);
            return Err(err);
        }
        return Ok(fd);
    }

    // Here we are asking the kernel to give us a cloexec fd.
    let newfd = match nix::fcntl::fcntl(&fd, FcntlArg::F_DUPFD_CLOEXEC(FIRST_HIGH_FD)) {
        Ok(newfd) => newfd,
        Err(err) => {
            flog!(flog, warning, "fcntl(F_DUPFD_CLOEXEC):", err);
            return Err(err);
        }
    };

    Ok(unsafe { OwnedFd::from_raw_fd(newfd) })
}

/// Sets CLO_EXEC on a given fd according to the value of `should_set`.
pub fn set_cloexec(fd: RawFd, should_set: bool) -> c_int {
    // Note we don't want to overwrite existing flags like O_NONBLOCK which may be set. So fetch the
    // existing flags and modify them.
    let flags = unsafe { libc::fcntl(fd, F_GETFD, 0) };
    if flags < 0 {
        return -1;
    }
    let mut new_flags = flags;
    if should_set {
        new_flags |= FD_CLOEXEC;
    } else {
        new_flags &= !FD_CLOEXEC;
    }
    if flags == new_flags {
        0
    } else {
        unsafe { libc::fcntl(fd, F_SETFD, new_flags) }
    }
}

/// Mark an fd as nonblocking
pub fn make_fd_nonblocking(fd: RawFd) -> nix::Result<()> {
    let flags = unsafe { libc::fcntl(fd, F_GETFL, 0) };
    if flags < 0 {
        return Err(nix::Error::last());
    }
    if (flags & O_NONBLOCK) == O_NONBLOCK {
        return Ok(());
    }
    match unsafe { libc::fcntl(fd, F_SETFL, flags | O_NONBLOCK) } {
        -1 => Err(nix::Error::last()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::{make_autoclose_pipes, make_fd_nonblocking, FIRST_HIGH_FD};
    use crate::flog::Flog;
    use crate::tests::prelude::*;
    use libc::{FD_CLOEXEC, F_GETFD, F_GETFL, O_NONBLOCK};
    use std::os::fd::AsRawFd;

    #[test]
    #[serial]
    fn test_pipes() {
        test_init();
        // Here we just test that each pipe has CLOEXEC set and is in the high range.
        // Note pipe creation may fail due to fd exhaustion; don't fail in that case.
        let flog = Flog::disabled();
        let mut pipes = vec![];
        for _i in 0..10 {
            if let Ok(pipe) = make_autoclose_pipes(&flog) {
                pipes.push(pipe);
            }
        }
        for pipe in pipes {
            for fd in [&pipe.read, &pipe.write] {
                let fd = fd.as_raw_fd();
                assert!(fd >= FIRST_HIGH_FD);
                let flags = unsafe { libc::fcntl(fd, F_GETFD, 0) };
                assert!(flags >= 0);
                assert_ne!(flags & FD_CLOEXEC, 0);
            }
        }
    }

    #[test]
    #[serial]
    fn test_nonblocking_and_close() {
        test_init();
        let pipe = make_autoclose_pipes(&Flog::disabled()).unwrap();
        let fd = pipe.write.as_raw_fd();
        make_fd_nonblocking(fd).unwrap();
        // Idempotent.
        make_fd_nonblocking(fd).unwrap();
        let flags = unsafe { libc::fcntl(fd, F_GETFL, 0) };
        assert_ne!(flags & O_NONBLOCK, 0);
        assert!(fd_is_open(fd));
        drop(pipe);
        assert!(!fd_is_open(fd));
        assert!(!fd_is_open(-1));
    }
}
