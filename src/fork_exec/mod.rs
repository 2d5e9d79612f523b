// A module concerned with the exec side of fork/exec: the async-signal safe code which happens in
// between fork and exec, and the logging it is allowed to do.

pub mod flog_safe;
pub mod postfork;
