//! Descriptor rewiring performed in the child between fork and exec.

use std::os::fd::RawFd;

/// A type that represents the action dup2(src, target).
/// If target is negative, this represents close(src).
/// Note none of the fds here are considered 'owned'.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dup2Action {
    pub src: RawFd,
    pub target: RawFd,
}

/// A sequence of dup2 and close actions, applied in order.
#[derive(Default, Debug)]
pub struct Dup2List {
    actions: Vec<Dup2Action>,
}

impl Dup2List {
    pub fn new() -> Self {
        Default::default()
    }

    /// The list for a bridged child: the pipe ends become stdin and stdout, and the originals
    /// are closed so that the child holds exactly one reference to each.
    pub fn for_child_stdio(stdin_read: RawFd, stdout_write: RawFd) -> Self {
        let mut result = Self::new();
        result.add_dup2(stdin_read, libc::STDIN_FILENO);
        result.add_dup2(stdout_write, libc::STDOUT_FILENO);
        result.add_close(stdin_read);
        result.add_close(stdout_write);
        result
    }

    /// Append a dup2 action.
    pub fn add_dup2(&mut self, src: RawFd, target: RawFd) {
        assert!(src >= 0 && target >= 0, "Invalid fd in add_dup2");
        // Closing src afterwards would close target too.
        assert!(src != target, "dup2 onto itself");
        self.actions.push(Dup2Action { src, target });
    }

    /// Append a close action.
    pub fn add_close(&mut self, fd: RawFd) {
        assert!(fd >= 0, "Invalid fd in add_close");
        self.actions.push(Dup2Action {
            src: fd,
            target: -1,
        });
    }

    /// Perform the actions. This runs in a forked child, so it must be async-signal safe.
    /// Return the errno of the first failing action.
    pub fn apply(&self) -> Result<(), i32> {
        for act in &self.actions {
            let ret = if act.target < 0 {
                unsafe { libc::close(act.src) }
            } else {
                unsafe { libc::dup2(act.src, act.target) }
            };
            if ret < 0 {
                return Err(errno::errno().0);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Dup2Action, Dup2List};

    #[test]
    fn test_child_stdio_actions() {
        let list = Dup2List::for_child_stdio(12, 15);
        assert_eq!(
            list.actions,
            [
                Dup2Action { src: 12, target: 0 },
                Dup2Action { src: 15, target: 1 },
                Dup2Action { src: 12, target: -1 },
                Dup2Action { src: 15, target: -1 },
            ]
        );
    }

    #[test]
    #[should_panic]
    fn test_dup2_onto_itself() {
        Dup2List::new().add_dup2(1, 1);
    }
}
