use crate::common::{assert_send, assert_sync};
use std::ffi::{c_char, CString};
use std::ptr;

/// The null-terminated array of NUL-terminated strings consumed by exec.
/// It owns its strings, so it can be built before fork() and used after it without allocating.
pub struct OwningNullTerminatedArray {
    // Each pointer refers into the heap buffer of the matching CString. Those buffers do not move
    // when the box of CStrings does, so the pointers stay valid for our lifetime. Never read, only
    // kept alive.
    _strings: Box<[CString]>,
    pointers: Box<[*const c_char]>,
}

/// Safety: the array is immutable after construction.
unsafe impl Send for OwningNullTerminatedArray {}
unsafe impl Sync for OwningNullTerminatedArray {}

const _: () = assert_send::<OwningNullTerminatedArray>();
const _: () = assert_sync::<OwningNullTerminatedArray>();

impl OwningNullTerminatedArray {
    /// Construct, taking ownership of a list of strings.
    pub fn new(strs: Vec<CString>) -> Self {
        let strings = strs.into_boxed_slice();
        let pointers = strings
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(ptr::null()))
            .collect();
        OwningNullTerminatedArray {
            _strings: strings,
            pointers,
        }
    }

    /// Return the list of pointers, appropriate for argv.
    pub fn get(&self) -> *const *const c_char {
        debug_assert!(self.pointers.last().is_some_and(|p| p.is_null()));
        self.pointers.as_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::OwningNullTerminatedArray;
    use std::ffi::{CStr, CString};
    use std::ptr;

    #[test]
    fn test_owning_null_terminated_array() {
        let owned_strs = vec![CString::new("sh").unwrap(), CString::new("-c").unwrap()];
        let arr = OwningNullTerminatedArray::new(owned_strs);
        let ptr = arr.get();
        unsafe {
            assert_eq!(CStr::from_ptr(*ptr).to_str().unwrap(), "sh");
            assert_eq!(CStr::from_ptr(*ptr.add(1)).to_str().unwrap(), "-c");
            assert_eq!(*ptr.add(2), ptr::null());
        }
    }

    #[test]
    fn test_empty_array_is_just_the_terminator() {
        let arr = OwningNullTerminatedArray::new(vec![]);
        unsafe { assert_eq!(*arr.get(), ptr::null()) };
    }
}
