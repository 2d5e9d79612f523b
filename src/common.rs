//! Small helpers shared across modules.

/// Exit without running atexit handlers or destructors. This is what a forked child must do,
/// since it shares buffered state with the parent.
pub fn exit_without_destructors(code: libc::c_int) -> ! {
    unsafe { libc::_exit(code) };
}

pub const fn assert_send<T: Send>() {}
pub const fn assert_sync<T: Sync>() {}
