use crate::fds::FIRST_HIGH_FD;
use once_cell::sync::OnceCell;
use std::os::fd::RawFd;

pub use serial_test::serial;

pub fn test_init() {
    static DONE: OnceCell<()> = OnceCell::new();
    DONE.get_or_init(|| {
        // The test harness already ignores SIGPIPE, but the bridge depends on it; make it explicit.
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        }
    });
}

/// Assert that every child of this process has been reaped.
pub fn assert_no_children() {
    let ret = unsafe { libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) };
    assert_eq!(ret, -1, "a child is still around");
    assert_eq!(errno::errno().0, libc::ECHILD);
}

/// The open fds in the high range, where our pipes live.
pub fn open_high_fds() -> Vec<RawFd> {
    (FIRST_HIGH_FD..FIRST_HIGH_FD + 256)
        .filter(|&fd| fd_is_open(fd))
        .collect()
}

/// Return whether `fd` refers to an open descriptor.
pub fn fd_is_open(fd: RawFd) -> bool {
    fd >= 0 && unsafe { libc::fcntl(fd, libc::F_GETFD, 0) } >= 0
}
