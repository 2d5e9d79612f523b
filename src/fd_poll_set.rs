//! A modest wrapper around poll() for a small, fixed set of fds.
//! Unlike a readability-only set, each slot carries its own interest (readable, writable), and a
//! slot may be retired permanently while the others stay in the set.

use nix::poll::PollFlags;
use std::os::fd::RawFd;

/// Index of an fd within an [`FdPollSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot(usize);

pub struct FdPollSet {
    pollfds: Vec<libc::pollfd>,
}

impl FdPollSet {
    /// Construct an empty set.
    pub fn new() -> FdPollSet {
        FdPollSet {
            pollfds: Vec::new(),
        }
    }

    /// Add an fd with the events to wait for, returning its slot.
    pub fn add(&mut self, fd: RawFd, events: PollFlags) -> Slot {
        assert!(fd >= 0, "Invalid fd in FdPollSet::add");
        self.pollfds.push(libc::pollfd {
            fd,
            events: events.bits(),
            revents: 0,
        });
        Slot(self.pollfds.len() - 1)
    }

    /// Stop waiting on a slot for good. poll() ignores negative fds, so the slot stays in place
    /// and reports no events from now on.
    pub fn retire(&mut self, slot: Slot) {
        let pollfd = &mut self.pollfds[slot.0];
        assert!(pollfd.fd >= 0, "Slot retired twice");
        pollfd.fd = -1;
        pollfd.revents = 0;
    }

    /// Return whether the slot is still being waited on.
    pub fn is_active(&self, slot: Slot) -> bool {
        self.pollfds[slot.0].fd >= 0
    }

    /// Return the events reported for the slot by the last wait.
    pub fn revents(&self, slot: Slot) -> PollFlags {
        PollFlags::from_bits_retain(self.pollfds[slot.0].revents)
    }

    /// Block until at least one active slot has events. There is no timeout: the child going away
    /// always shows up as a hangup.
    /// Return the number of slots with events. EINTR is returned to the caller, not retried.
    pub fn wait(&mut self) -> nix::Result<usize> {
        for pollfd in &mut self.pollfds {
            pollfd.revents = 0;
        }
        let count = self.pollfds.len();
        assert!(count <= libc::nfds_t::MAX as usize, "count too big");
        let ret = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                count as libc::nfds_t,
                // Negative means wait forever in poll-speak.
                -1,
            )
        };
        if ret < 0 {
            return Err(nix::Error::last());
        }
        Ok(ret as usize)
    }
}

impl Default for FdPollSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::FdPollSet;
    use crate::fds::make_autoclose_pipes;
    use crate::flog::Flog;
    use crate::tests::prelude::*;
    use nix::poll::PollFlags;
    use std::os::fd::AsRawFd;

    #[test]
    #[serial]
    fn test_read_write_and_hangup() {
        test_init();
        let pipe = make_autoclose_pipes(&Flog::disabled()).unwrap();
        let mut set = FdPollSet::new();
        let rslot = set.add(pipe.read.as_raw_fd(), PollFlags::POLLIN);
        let wslot = set.add(pipe.write.as_raw_fd(), PollFlags::POLLOUT);

        // An empty pipe is writable but not readable.
        assert_eq!(set.wait(), Ok(1));
        assert!(set.revents(wslot).contains(PollFlags::POLLOUT));
        assert!(set.revents(rslot).is_empty());

        nix::unistd::write(&pipe.write, b"x").unwrap();
        set.wait().unwrap();
        assert!(set.revents(rslot).contains(PollFlags::POLLIN));

        // Once the writer is gone, the reader sees a hangup alongside the pending byte.
        set.retire(wslot);
        assert!(!set.is_active(wslot));
        drop(pipe.write);
        assert_eq!(set.wait(), Ok(1));
        assert!(set.revents(rslot).contains(PollFlags::POLLIN | PollFlags::POLLHUP));
        assert!(set.revents(wslot).is_empty());

        set.retire(rslot);
        assert!(!set.is_active(rslot));
    }

    #[test]
    #[should_panic]
    fn test_retire_twice() {
        let mut set = FdPollSet::new();
        let slot = set.add(0, PollFlags::POLLIN);
        set.retire(slot);
        set.retire(slot);
    }
}
