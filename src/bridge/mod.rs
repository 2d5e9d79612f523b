//! Run an external program as a byte transform: feed it a buffer on stdin, collect its stdout.
//!
//! A call goes through three phases. [`spawn`] creates the pipes and the child, [`pump`] moves
//! bytes in both directions until the child hangs up its stdout, and [`reap`] closes everything,
//! waits for the child and decides the result. Reaping happens on every path that got as far as
//! forking, including pump failures.
//!
//! The child must not close its stdout while it is still alive and reading stdin: the hang-up on
//! stdout is taken as the end of the conversation. A child that does so anyway gets its stdin
//! closed early, and the call fails with [`BridgeError::IncompleteInputDelivery`] unless the
//! child reports a nonzero status first.
//!
//! `SIGPIPE` must be ignored in the calling process (Rust binaries do this by default), so that a
//! child which exits without reading all of its input shows up as a failed write.

mod pump;
mod reap;
mod spawn;

use crate::flog::Flog;
use crate::null_terminated_array::OwningNullTerminatedArray;
use crate::proc::ProcStatus;
use nix::poll::PollFlags;
use std::ffi::{CString, NulError, OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::OsStrExt;

/// A program and its argument vector. The argument vector includes `argv[0]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    program: OsString,
    argv: Vec<OsString>,
}

impl Command {
    /// A command whose argument vector is just the program name.
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        let program = program.as_ref().to_owned();
        Command {
            argv: vec![program.clone()],
            program,
        }
    }

    /// A command with an explicit argument vector, `argv[0]` included.
    pub fn with_argv<I, S>(program: impl AsRef<OsStr>, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command {
            program: program.as_ref().to_owned(),
            argv: argv.into_iter().map(|s| s.as_ref().to_owned()).collect(),
        }
    }

    /// Append an argument.
    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.argv.push(arg.as_ref().to_owned());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    pub fn get_program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_argv(&self) -> impl Iterator<Item = &OsStr> {
        self.argv.iter().map(OsString::as_os_str)
    }

    /// Convert to what exec wants. This allocates, so it must happen before fork.
    fn to_exec_args(&self) -> Result<(CString, OwningNullTerminatedArray), NulError> {
        let program = CString::new(self.program.as_bytes())?;
        let argv = self
            .argv
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((program, OwningNullTerminatedArray::new(argv)))
    }
}

/// Which of the child's streams a condition was seen on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Stdin,
    Stdout,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stream::Stdin => "stdin",
            Stream::Stdout => "stdout",
        })
    }
}

/// Why a bridge call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The program or an argument contains a NUL byte.
    InvalidArgument,
    PipeCreation(nix::Error),
    ProcessCreation(nix::Error),
    ReadinessWait(nix::Error),
    Write(nix::Error),
    Read(nix::Error),
    /// The child produced more than the output buffer holds.
    OutputOverflow { capacity: usize },
    /// poll() reported something other than readiness or a hang-up of stdout.
    UnexpectedReadinessCondition { stream: Stream, revents: PollFlags },
    TerminationRetrieval(nix::Error),
    /// The child was killed by a signal, or otherwise did not exit.
    AbnormalTermination(ProcStatus),
    /// The child exited with a nonzero status; 127 means it could not be launched.
    NonZeroExit(u8),
    IncompleteInputDelivery { written: usize, expected: usize },
}

impl BridgeError {
    /// The signed result reported to callers: `-N` for a child exit status N, `-1` for
    /// everything else.
    pub fn sentinel(&self) -> isize {
        match self {
            BridgeError::NonZeroExit(code) => -isize::from(*code),
            _ => -1,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use BridgeError::*;
        match self {
            InvalidArgument => write!(f, "command contains a NUL byte"),
            PipeCreation(err) => write!(f, "failed to create pipe: {err}"),
            ProcessCreation(err) => write!(f, "failed to fork: {err}"),
            ReadinessWait(err) => write!(f, "poll error: {err}"),
            Write(err) => write!(f, "write error: {err}"),
            Read(err) => write!(f, "read error: {err}"),
            OutputOverflow { capacity } => {
                write!(f, "output too long (capacity {capacity} bytes)")
            }
            UnexpectedReadinessCondition { stream, revents } => {
                write!(f, "unknown poll event on {stream} ({revents:?})")
            }
            TerminationRetrieval(err) => write!(f, "waitpid error: {err}"),
            AbnormalTermination(status) => write!(f, "child process did not exit: {status}"),
            NonZeroExit(code) => write!(f, "child exited with status {code}"),
            IncompleteInputDelivery { written, expected } => {
                write!(f, "incomplete write ({written} of {expected} bytes)")
            }
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use BridgeError::*;
        match self {
            PipeCreation(err) | ProcessCreation(err) | ReadinessWait(err) | Write(err)
            | Read(err) | TerminationRetrieval(err) => Some(err),
            _ => None,
        }
    }
}

/// Run `command`, piping `input` to its stdin and collecting its stdout into `output`.
/// Return the number of bytes produced, or the reason the call failed.
/// The length of `output` is the capacity; nothing past it is ever written.
pub fn try_run(
    flog: &Flog,
    command: &Command,
    input: &[u8],
    output: &mut [u8],
) -> Result<usize, BridgeError> {
    let mut spawned = spawn::spawn(flog, command)?;
    let pumped = pump::pump(flog, &mut spawned.stdin, &spawned.stdout, input, output);
    reap::reap(flog, spawned, pumped, input.len())
}

/// Like [`try_run`], reporting the result as a single signed number: the number of bytes
/// produced on success, `-N` if the child exited with status N (`-127` if it could not be
/// launched), and `-1` for any other failure.
pub fn run(flog: &Flog, command: &Command, input: &[u8], output: &mut [u8]) -> isize {
    match try_run(flog, command, input, output) {
        // A slice never holds more than isize::MAX bytes.
        Ok(len) => len as isize,
        Err(err) => err.sentinel(),
    }
}

#[cfg(test)]
mod tests {
    use super::{BridgeError, Command, Stream};
    use crate::proc::ProcStatus;
    use nix::poll::PollFlags;
    use std::ffi::{CStr, OsStr};

    #[test]
    fn test_command_argv() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").args(["exit 3", "ignored"]);
        assert_eq!(cmd.get_program(), "sh");
        let argv: Vec<&OsStr> = cmd.get_argv().collect();
        assert_eq!(argv, ["sh", "-c", "exit 3", "ignored"]);

        let cmd = Command::with_argv("/bin/echo", ["echo", "hi"]);
        assert_eq!(cmd.get_program(), "/bin/echo");
        assert_eq!(cmd.get_argv().count(), 2);
        let (program, argv) = cmd.to_exec_args().unwrap();
        assert_eq!(program.to_bytes(), b"/bin/echo");
        let argv0 = unsafe { CStr::from_ptr(*argv.get()) };
        assert_eq!(argv0.to_bytes(), b"echo");
    }

    #[test]
    fn test_nul_in_argument() {
        let mut cmd = Command::new("cat");
        cmd.arg("a\0b");
        assert!(cmd.to_exec_args().is_err());
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(BridgeError::NonZeroExit(1).sentinel(), -1);
        assert_eq!(BridgeError::NonZeroExit(127).sentinel(), -127);
        assert_eq!(BridgeError::NonZeroExit(255).sentinel(), -255);
        assert_eq!(BridgeError::OutputOverflow { capacity: 4 }.sentinel(), -1);
        assert_eq!(BridgeError::Write(nix::Error::EPIPE).sentinel(), -1);
        let killed = ProcStatus::from_waitpid(libc::SIGKILL);
        assert_eq!(BridgeError::AbnormalTermination(killed).sentinel(), -1);
        let incomplete = BridgeError::IncompleteInputDelivery {
            written: 1,
            expected: 2,
        };
        assert_eq!(incomplete.sentinel(), -1);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            BridgeError::NonZeroExit(3).to_string(),
            "child exited with status 3"
        );
        let err = BridgeError::UnexpectedReadinessCondition {
            stream: Stream::Stdin,
            revents: PollFlags::POLLERR,
        };
        assert!(err.to_string().starts_with("unknown poll event on stdin"));
        let read_err = BridgeError::Read(nix::Error::EIO);
        assert!(std::error::Error::source(&read_err).is_some());
        assert!(std::error::Error::source(&BridgeError::InvalidArgument).is_none());
    }
}
