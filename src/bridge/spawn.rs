use super::{BridgeError, Command};
use crate::fds::{make_autoclose_pipes, make_fd_nonblocking};
use crate::flog::{flog, Flog};
use crate::fork_exec::postfork::{child_exec, execute_fork};
use crate::proc::ChildHandle;
use crate::redirection::Dup2List;
use std::os::fd::{AsRawFd, OwnedFd};

/// The parent's side of a freshly started child.
/// Fields drop in declaration order: both pipe ends are closed before the child is waited for.
pub(super) struct Spawned {
    /// Write end of the child's stdin. None once all input has been delivered.
    pub stdin: Option<OwnedFd>,
    /// Read end of the child's stdout.
    pub stdout: OwnedFd,
    pub child: ChildHandle,
}

/// Create the pipes and fork; the child rewires its stdin and stdout and execs `command`.
/// Nothing is left behind on failure.
pub(super) fn spawn(flog: &Flog, command: &Command) -> Result<Spawned, BridgeError> {
    let (program, argv) = command.to_exec_args().map_err(|_| {
        flog!(flog, error, "NUL byte in command", command.get_program().to_string_lossy());
        BridgeError::InvalidArgument
    })?;

    let stdin_pipe = make_autoclose_pipes(flog).map_err(BridgeError::PipeCreation)?;
    let stdout_pipe = make_autoclose_pipes(flog).map_err(BridgeError::PipeCreation)?;
    flog!(
        flog,
        bridge_pipes,
        format!(
            "pipes: in {}/{}; out {}/{}",
            stdin_pipe.read.as_raw_fd(),
            stdin_pipe.write.as_raw_fd(),
            stdout_pipe.read.as_raw_fd(),
            stdout_pipe.write.as_raw_fd()
        )
    );

    // Built before fork, since the child may not allocate.
    let dup2s = Dup2List::for_child_stdio(
        stdin_pipe.read.as_raw_fd(),
        stdout_pipe.write.as_raw_fd(),
    );

    flog!(
        flog,
        exec_fork,
        "Fork for",
        format!("{:?}", command.get_argv().collect::<Vec<_>>())
    );
    let pid = execute_fork(flog).map_err(BridgeError::ProcessCreation)?;
    if pid == 0 {
        child_exec(flog, &dup2s, &program, &argv);
    }
    let child = ChildHandle::new(pid);

    // Close the halves the child uses.
    drop(stdin_pipe.read);
    drop(stdout_pipe.write);

    let spawned = Spawned {
        stdin: Some(stdin_pipe.write),
        stdout: stdout_pipe.read,
        child,
    };
    for fd in [spawned.stdin.as_ref(), Some(&spawned.stdout)].into_iter().flatten() {
        if let Err(err) = make_fd_nonblocking(fd.as_raw_fd()) {
            flog!(flog, error, "Failed to make pipe nonblocking:", err);
            // Dropping `spawned` closes our ends and then reaps the child.
            return Err(BridgeError::PipeCreation(err));
        }
    }
    Ok(spawned)
}
