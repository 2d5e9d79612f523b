#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]
#![allow(unknown_lints)]
#![allow(clippy::bool_assert_comparison)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]
#![allow(clippy::uninlined_format_args)]

pub mod common;

pub mod bridge;
pub mod fd_poll_set;
pub mod fds;
pub mod flog;
pub mod fork_exec;
pub mod null_terminated_array;
pub mod proc;
pub mod redirection;

#[cfg(test)]
mod tests;
