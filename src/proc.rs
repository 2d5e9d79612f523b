//! Tracking a single forked child: its pid, and how it terminated.

use crate::flog::{flog, Flog};
use libc::{pid_t, WEXITSTATUS, WIFEXITED, WIFSIGNALED, WIFSTOPPED, WTERMSIG};
use std::fmt;

/// A ProcStatus is a value type that encapsulates logic around exited vs stopped vs signaled,
/// for a status returned by waitpid().
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProcStatus(i32);

impl ProcStatus {
    /// Construct from a status returned from a waitpid call.
    pub fn from_waitpid(status: i32) -> ProcStatus {
        ProcStatus(status)
    }

    /// Return if we are stopped (as in SIGSTOP).
    pub fn stopped(&self) -> bool {
        WIFSTOPPED(self.0)
    }

    /// Return if we exited normally (not a signal).
    pub fn normal_exited(&self) -> bool {
        WIFEXITED(self.0)
    }

    /// Return if we exited because of a signal.
    pub fn signal_exited(&self) -> bool {
        WIFSIGNALED(self.0)
    }

    /// Return the signal code, given that we signal exited.
    pub fn signal_code(&self) -> libc::c_int {
        assert!(self.signal_exited(), "Process is not signal exited");
        WTERMSIG(self.0)
    }

    /// Return the exit code, given that we normal exited.
    pub fn exit_code(&self) -> u8 {
        assert!(self.normal_exited(), "Process is not normal exited");
        // WEXITSTATUS masks to the low eight bits.
        WEXITSTATUS(self.0) as u8
    }
}

impl fmt::Display for ProcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.normal_exited() {
            write!(f, "exited with status {}", self.exit_code())
        } else if self.signal_exited() {
            write!(f, "killed by signal {}", self.signal_code())
        } else if self.stopped() {
            write!(f, "stopped")
        } else {
            write!(f, "unknown wait status {:#x}", self.0)
        }
    }
}

/// A forked child which has not necessarily been reaped yet.
/// The child is reaped exactly once: by [`ChildHandle::wait`], or else when the handle is dropped.
#[derive(Debug)]
pub struct ChildHandle {
    pid: pid_t,
    reaped: bool,
}

impl ChildHandle {
    pub fn new(pid: pid_t) -> Self {
        assert!(pid > 0, "Invalid child pid");
        ChildHandle { pid, reaped: false }
    }

    /// Block until the child terminates and return its status. There is no timeout.
    /// A waitpid() failure other than EINTR is returned, and the child is considered gone: it
    /// will not be waited for again.
    pub fn wait(&mut self, flog: &Flog) -> nix::Result<ProcStatus> {
        assert!(!self.reaped, "Child reaped twice");
        let result = waitpid_blocking(self.pid);
        self.reaped = true;
        match result {
            Ok(status) => {
                flog!(flog, bridge_reap, "child", self.pid, status);
                Ok(status)
            }
            Err(err) => {
                flog!(flog, error, "waitpid error for child", self.pid, ":", err);
                Err(err)
            }
        }
    }
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = waitpid_blocking(self.pid);
            self.reaped = true;
        }
    }
}

fn waitpid_blocking(pid: pid_t) -> nix::Result<ProcStatus> {
    loop {
        let mut status: libc::c_int = 0;
        let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
        if ret == pid {
            return Ok(ProcStatus::from_waitpid(status));
        }
        if ret < 0 {
            let err = nix::Error::last();
            if err == nix::Error::EINTR {
                continue;
            }
            return Err(err);
        }
        // waitpid(pid, .., 0) returns either pid or -1.
        panic!("Unexpected waitpid() return {ret} for child {pid}");
    }
}
