//! Logging which is safe to use between fork() and exec().

use std::ffi::CStr;

/// Scratch space for formatting an integer; 24 bytes holds any i64 or u64 with its sign.
pub struct IntBuffer([u8; 24]);

impl IntBuffer {
    pub const fn new() -> Self {
        IntBuffer([0; 24])
    }

    /// Format `magnitude` in decimal, right-aligned in the buffer, and return the digits.
    fn format(&mut self, mut magnitude: u64, negative: bool) -> &[u8] {
        let buf = &mut self.0;
        let mut start = buf.len();
        loop {
            start -= 1;
            buf[start] = b'0' + (magnitude % 10) as u8;
            magnitude /= 10;
            if magnitude == 0 {
                break;
            }
        }
        if negative {
            start -= 1;
            buf[start] = b'-';
        }
        &buf[start..]
    }
}

/// A trait like FloggableDisplay but for async-signal-safe types.
/// Implementations must not panic, allocate or lock. Bytes are assumed UTF-8.
pub trait FloggableDisplayAsyncSafe {
    fn to_flog_bytes<'a>(&'a self, storage: &'a mut IntBuffer) -> &'a [u8];
}

impl FloggableDisplayAsyncSafe for &str {
    fn to_flog_bytes<'a>(&'a self, _storage: &'a mut IntBuffer) -> &'a [u8] {
        self.as_bytes()
    }
}

impl FloggableDisplayAsyncSafe for &[u8] {
    fn to_flog_bytes<'a>(&'a self, _storage: &'a mut IntBuffer) -> &'a [u8] {
        self
    }
}

impl FloggableDisplayAsyncSafe for &CStr {
    fn to_flog_bytes<'a>(&'a self, _storage: &'a mut IntBuffer) -> &'a [u8] {
        self.to_bytes()
    }
}

impl FloggableDisplayAsyncSafe for i32 {
    fn to_flog_bytes<'a>(&'a self, storage: &'a mut IntBuffer) -> &'a [u8] {
        storage.format(u64::from(self.unsigned_abs()), *self < 0)
    }
}

impl FloggableDisplayAsyncSafe for i64 {
    fn to_flog_bytes<'a>(&'a self, storage: &'a mut IntBuffer) -> &'a [u8] {
        storage.format(self.unsigned_abs(), *self < 0)
    }
}

impl FloggableDisplayAsyncSafe for usize {
    fn to_flog_bytes<'a>(&'a self, storage: &'a mut IntBuffer) -> &'a [u8] {
        storage.format(*self as u64, false)
    }
}

/// Write one piece of a log line. Short writes and errors are ignored: the child is about to
/// exit, and there is nobody to report to.
pub fn flog_impl_async_safe(fd: i32, s: impl FloggableDisplayAsyncSafe) {
    if fd < 0 {
        return;
    }
    let mut storage = IntBuffer::new();
    let bytes = s.to_flog_bytes(&mut storage);
    unsafe {
        let _ = libc::write(fd, bytes.as_ptr().cast(), bytes.len());
    }
}

/// Variant of flog! which is async-safe to use after fork().
/// The arguments are NOT space-separated. Embed real spaces in your literals.
macro_rules! flog_safe {
    ($flog:expr, $category:ident, $($elem:expr),+ $(,)*) => {
        if $flog.enabled($crate::flog::Categories::$category) {
            #[allow(unused_imports)]
            use $crate::fork_exec::flog_safe::{flog_impl_async_safe, FloggableDisplayAsyncSafe};
            let fd = $flog.fd();
            // A lookup in a static table, so this does not allocate.
            flog_impl_async_safe(fd, $crate::flog::Categories::$category.name());
            flog_impl_async_safe(fd, ": ");
            $(
                flog_impl_async_safe(fd, $elem);
            )+
            flog_impl_async_safe(fd, "\n");
        }
    };
}

pub(crate) use flog_safe;

#[cfg(test)]
mod tests {
    use super::{flog_safe, FloggableDisplayAsyncSafe, IntBuffer};
    use crate::fds::make_autoclose_pipes;
    use crate::flog::{flog, Categories, Flog};
    use crate::tests::prelude::*;
    use std::ffi::CStr;
    use std::os::fd::AsRawFd;

    fn check_int<T: FloggableDisplayAsyncSafe + std::fmt::Display>(val: T) {
        let mut storage = IntBuffer::new();
        assert_eq!(val.to_flog_bytes(&mut storage), val.to_string().as_bytes());
    }

    #[test]
    fn test_int_to_flog_bytes() {
        for x in [-1000, -127, -1, 0, 1, 9, 10, 127, 4096] {
            check_int(x);
            check_int(x as i64);
        }
        check_int(i32::MIN);
        check_int(i64::MIN);
        check_int(i64::MAX);
        check_int(usize::MAX);
        check_int(0usize);
    }

    #[test]
    fn test_str_to_flog_bytes() {
        let mut storage = IntBuffer::new();
        let cstr = CStr::from_bytes_with_nul(b"cat\0").unwrap();
        assert_eq!(cstr.to_flog_bytes(&mut storage), b"cat");
        assert_eq!("".to_flog_bytes(&mut storage), b"");
        let bytes: &[u8] = b"\x01raw";
        assert_eq!(bytes.to_flog_bytes(&mut storage), b"\x01raw");
    }

    #[test]
    #[serial]
    fn test_line_prefix_matches_flog() {
        test_init();
        let pipe = make_autoclose_pipes(&Flog::disabled()).unwrap();
        let mut flog = Flog::disabled().with_fd(pipe.write.as_raw_fd());
        flog.set_enabled(Categories::exec_fork, true);

        flog_safe!(flog, exec_fork, "forked ", 42i32);
        flog!(flog, exec_fork, "forked", 42);
        drop(pipe.write);

        let mut buf = [0u8; 256];
        let n = nix::unistd::read(&pipe.read, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"exec-fork: forked 42\nexec-fork: forked 42\n");
    }
}
