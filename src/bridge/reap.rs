use super::pump::PumpOutcome;
use super::spawn::Spawned;
use super::BridgeError;
use crate::flog::{flog, Flog};

/// Close our ends of the pipes, wait for the child and decide the result of the call.
///
/// The child's own verdict wins over anything the pump saw: a child which exits nonzero usually
/// also broke the pipe we were writing to, and its exit status is the more useful report.
pub(super) fn reap(
    flog: &Flog,
    spawned: Spawned,
    pumped: PumpOutcome,
    input_len: usize,
) -> Result<usize, BridgeError> {
    let Spawned {
        stdin,
        stdout,
        mut child,
    } = spawned;
    // A child blocked on either pipe sees EOF or EPIPE now, so the wait below cannot hang on us.
    drop(stdin);
    drop(stdout);

    let status = child
        .wait(flog)
        .map_err(BridgeError::TerminationRetrieval)?;

    if status.normal_exited() {
        let code = status.exit_code();
        if code != 0 {
            flog!(flog, error, "child exited with status", code);
            return Err(BridgeError::NonZeroExit(code));
        }
    } else {
        flog!(flog, error, "child process did not exit:", status);
        return Err(BridgeError::AbnormalTermination(status));
    }

    if let Some(err) = pumped.error {
        return Err(err);
    }

    if pumped.written != input_len {
        flog!(
            flog,
            error,
            "Incomplete write.",
            pumped.written,
            "of",
            input_len,
            "bytes"
        );
        return Err(BridgeError::IncompleteInputDelivery {
            written: pumped.written,
            expected: input_len,
        });
    }

    flog!(flog, bridge_reap, "received", pumped.received, "bytes");
    Ok(pumped.received)
}
