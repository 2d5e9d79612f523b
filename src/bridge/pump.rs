use super::{BridgeError, Stream};
use crate::fd_poll_set::{FdPollSet, Slot};
use crate::flog::{escape_bytes, flog, should_flog, Flog};
use nix::poll::PollFlags;
use std::os::fd::{AsRawFd, OwnedFd};

/// How far the pump got. Counts are valid even when `error` is set.
#[derive(Debug, Default)]
pub(super) struct PumpOutcome {
    /// Bytes of input accepted by the child.
    pub written: usize,
    /// Bytes of output stored.
    pub received: usize,
    pub error: Option<BridgeError>,
}

/// Feed `input` to the child's stdin and collect its stdout into `output`, until stdout hangs up
/// or something goes wrong. Stdin is closed (set to None) once all input has been delivered.
pub(super) fn pump(
    flog: &Flog,
    stdin: &mut Option<OwnedFd>,
    stdout: &OwnedFd,
    input: &[u8],
    output: &mut [u8],
) -> PumpOutcome {
    let mut pump = Pump {
        flog,
        stdin,
        stdout,
        input,
        output,
        written: 0,
        received: 0,
    };
    let error = pump.run().err();
    if let Some(err) = &error {
        flog!(flog, bridge_pump, "pump stopped:", err);
    }
    PumpOutcome {
        written: pump.written,
        received: pump.received,
        error,
    }
}

struct Pump<'a> {
    flog: &'a Flog,
    stdin: &'a mut Option<OwnedFd>,
    stdout: &'a OwnedFd,
    input: &'a [u8],
    output: &'a mut [u8],
    written: usize,
    received: usize,
}

/// What a readable stdout turned out to hold.
enum ReadResult {
    Data,
    Eof,
    Nothing,
}

impl Pump<'_> {
    fn run(&mut self) -> Result<(), BridgeError> {
        let mut set = FdPollSet::new();
        let out_slot = set.add(self.stdout.as_raw_fd(), PollFlags::POLLIN);
        let in_slot = if self.input.is_empty() {
            // Nothing to say; let the child see EOF right away.
            self.close_stdin();
            None
        } else {
            self.stdin
                .as_ref()
                .map(|fd| set.add(fd.as_raw_fd(), PollFlags::POLLOUT))
        };

        loop {
            match set.wait() {
                Ok(_) => (),
                Err(nix::Error::EINTR) => continue,
                Err(err) => {
                    flog!(self.flog, error, "poll:", err);
                    return Err(BridgeError::ReadinessWait(err));
                }
            }

            if let Some(slot) = in_slot.filter(|&slot| set.is_active(slot)) {
                self.service_stdin(&mut set, slot)?;
            }

            let mut revents = set.revents(out_slot);
            let mut had_data = false;
            if revents.contains(PollFlags::POLLIN) {
                revents.remove(PollFlags::POLLIN);
                match self.read_stdout()? {
                    ReadResult::Data => had_data = true,
                    ReadResult::Eof => break,
                    ReadResult::Nothing => (),
                }
            }
            if revents.is_empty() {
                continue;
            }
            if revents == PollFlags::POLLHUP {
                if had_data {
                    // There may be more buffered behind the hangup; drain it first.
                    continue;
                }
                break;
            }
            flog!(
                self.flog,
                error,
                "unknown poll event on stdout:",
                format!("{:?}", revents)
            );
            return Err(BridgeError::UnexpectedReadinessCondition {
                stream: Stream::Stdout,
                revents,
            });
        }

        flog!(
            self.flog,
            bridge_pump,
            format!(
                "stdout hung up after {} bytes in, {} bytes out",
                self.written, self.received
            )
        );
        Ok(())
    }

    /// Write what the pipe takes, and close it once the input is exhausted.
    fn service_stdin(&mut self, set: &mut FdPollSet, slot: Slot) -> Result<(), BridgeError> {
        let mut revents = set.revents(slot);
        if revents.contains(PollFlags::POLLOUT) {
            revents.remove(PollFlags::POLLOUT);
            if let Some(fd) = self.stdin.as_ref() {
                match nix::unistd::write(fd, &self.input[self.written..]) {
                    Ok(n) => {
                        self.written += n;
                        debug_assert!(self.written <= self.input.len());
                        flog!(self.flog, bridge_pump, "wrote", n, "bytes to stdin");
                    }
                    Err(nix::Error::EAGAIN | nix::Error::EINTR) => (),
                    Err(err) => {
                        flog!(self.flog, error, "write error:", err);
                        return Err(BridgeError::Write(err));
                    }
                }
            }
            if self.written == self.input.len() {
                set.retire(slot);
                self.close_stdin();
            }
        }
        if !revents.is_empty() {
            flog!(
                self.flog,
                error,
                "unknown poll event on stdin:",
                format!("{:?}", revents)
            );
            return Err(BridgeError::UnexpectedReadinessCondition {
                stream: Stream::Stdin,
                revents,
            });
        }
        Ok(())
    }

    fn read_stdout(&mut self) -> Result<ReadResult, BridgeError> {
        let capacity = self.output.len();
        if self.received == capacity {
            // The buffer is full. That is fine as long as the child has nothing more to say.
            let mut probe = [0u8; 1];
            return match nix::unistd::read(self.stdout, &mut probe) {
                Ok(0) => Ok(ReadResult::Eof),
                Ok(_) => {
                    flog!(self.flog, error, "output too long, capacity", capacity);
                    Err(BridgeError::OutputOverflow { capacity })
                }
                Err(nix::Error::EAGAIN | nix::Error::EINTR) => Ok(ReadResult::Nothing),
                Err(err) => {
                    flog!(self.flog, error, "read error:", err);
                    Err(BridgeError::Read(err))
                }
            };
        }

        let start = self.received;
        match nix::unistd::read(self.stdout, &mut self.output[start..]) {
            Ok(0) => Ok(ReadResult::Eof),
            Ok(n) => {
                self.received += n;
                debug_assert!(self.received <= capacity);
                flog!(self.flog, bridge_pump, "read", n, "bytes from stdout");
                if should_flog!(self.flog, bridge_data) {
                    let chunk = escape_bytes(&self.output[start..self.received]);
                    flog!(self.flog, bridge_data, chunk);
                }
                Ok(ReadResult::Data)
            }
            Err(nix::Error::EAGAIN | nix::Error::EINTR) => Ok(ReadResult::Nothing),
            Err(err) => {
                flog!(self.flog, error, "read error:", err);
                Err(BridgeError::Read(err))
            }
        }
    }

    fn close_stdin(&mut self) {
        if self.stdin.take().is_some() {
            flog!(
                self.flog,
                bridge_pump,
                "closed stdin after",
                self.written,
                "bytes"
            );
        }
    }
}
