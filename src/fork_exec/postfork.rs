// The stuff that happens around fork.
// Everything that runs in the child must be async-signal safe.
// That means no locking, no allocating, no freeing memory, etc!
use super::flog_safe::flog_safe;
use crate::common::exit_without_destructors;
use crate::flog::{flog, Flog};
use crate::null_terminated_array::OwningNullTerminatedArray;
use crate::redirection::Dup2List;
use libc::pid_t;
use std::ffi::CStr;
use std::time::Duration;

/// The number of times to try to call fork() before giving up.
const FORK_LAPS: usize = 5;

/// The time to sleep between attempts to call fork().
const FORK_SLEEP_TIME: Duration = Duration::from_millis(1);

/// The status a child exits with when its program could not be started.
pub const EXEC_FAILED_STATUS: i32 = 127;

/// This function is a wrapper around fork. If the fork call fails with EAGAIN, it is retried
/// FORK_LAPS times, with a very slight delay between each lap.
/// Returns 0 in the child and the child's pid in the parent.
pub fn execute_fork(flog: &Flog) -> nix::Result<pid_t> {
    let mut err = nix::Error::UnknownErrno;
    for i in 0..FORK_LAPS {
        let pid = unsafe { libc::fork() };
        if pid >= 0 {
            return Ok(pid);
        }
        err = nix::Error::last();
        if err != nix::Error::EAGAIN {
            break;
        }
        // Don't sleep on the final lap
        if i != FORK_LAPS - 1 {
            std::thread::sleep(FORK_SLEEP_TIME);
        }
    }

    match err {
        nix::Error::EAGAIN => {
            flog!(flog, error, "fork: Out of resources. Check RLIMIT_NPROC and pid_max.");
        }
        nix::Error::ENOMEM => {
            flog!(flog, error, "fork: Out of memory.");
        }
        _ => {
            flog!(flog, error, "fork:", err);
        }
    }
    Err(err)
}

/// Set up the child's descriptors and replace its image. This is called in the forked child and
/// never returns: if anything fails, the child exits with [`EXEC_FAILED_STATUS`].
pub fn child_exec(
    flog: &Flog,
    dup2s: &Dup2List,
    program: &CStr,
    argv: &OwningNullTerminatedArray,
) -> ! {
    if let Err(err) = dup2s.apply() {
        flog_safe!(
            flog,
            warning,
            "failed to set up file descriptors in child, error number ",
            err
        );
        exit_without_destructors(EXEC_FAILED_STATUS);
    }

    // Rust programs ignore SIGPIPE, and ignored signals survive exec. Give the program the
    // default disposition, so it dies quietly when we stop reading its output.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    unsafe { libc::execvp(program.as_ptr(), argv.get()) };

    let err = errno::errno().0;
    safe_report_exec_error(flog, err, program);
    exit_without_destructors(EXEC_FAILED_STATUS)
}

/// Explain why exec() failed, from the child. Async-signal safe.
pub(crate) fn safe_report_exec_error(flog: &Flog, err: i32, actual_cmd: &CStr) {
    let reason: &str = match err {
        libc::ENOENT => "The file does not exist or could not be executed.",
        libc::EACCES => "The file could not be accessed.",
        libc::ENOEXEC => "The file could not be run by the operating system.",
        libc::E2BIG => "The total size of the argument list exceeds the operating system limit.",
        libc::ENOMEM => "Out of memory.",
        libc::ETXTBSY => "File is currently open for writing.",
        libc::ELOOP => "Too many layers of symbolic links. Maybe a loop?",
        libc::EINVAL => "Unsupported format.",
        libc::EISDIR => "File is a directory.",
        libc::ENOTDIR => "A path component is not a directory.",
        libc::EMFILE => "Too many open files in this process.",
        libc::ENFILE => "Too many open files on the system.",
        libc::ENAMETOOLONG => "Name is too long.",
        libc::EPERM => "No permission. Either suid/sgid is forbidden or you lack capabilities.",
        #[cfg(apple)]
        libc::EBADARCH => "Bad CPU type in executable.",
        _ => {
            flog_safe!(
                flog,
                exec,
                "Failed to execute process '",
                actual_cmd,
                "', unknown error number ",
                err,
            );
            return;
        }
    };
    flog_safe!(
        flog,
        exec,
        "Failed to execute process '",
        actual_cmd,
        "': ",
        reason
    );
}
