//! Categorized debug logging.
//!
//! Unlike a process-wide logger, a [`Flog`] is a plain value: it is handed to every bridge call,
//! so two callers in the same process may log different categories to different fds.

use bitflags::bitflags;
use std::os::fd::{BorrowedFd, RawFd};

/// The entry point for flogging.
macro_rules! flog {
    ($flog:expr, $category:ident, $($elem:expr),+ $(,)*) => {
        if $flog.enabled($crate::flog::Categories::$category) {
            #[allow(unused_imports)]
            use $crate::flog::{FloggableDisplay, FloggableDebug};
            let mut vs = vec![format!("{}:", $crate::flog::Categories::$category.name())];
            $(
                {
                   vs.push($elem.to_flog_str())
                }
            )+
            // We don't use locking here so we have to append our own newline to avoid multiple writes.
            let mut v = vs.join(" ");
            v.push('\n');
            $flog.write(&v);
        }
    };
}

macro_rules! should_flog {
    ($flog:expr, $category:ident) => {
        $flog.enabled($crate::flog::Categories::$category)
    };
}

pub(crate) use {flog, should_flog};

/// Environment variable holding comma-separated category patterns, see
/// [`Flog::activate_by_pattern`].
pub const DEBUG_ENV_VAR: &str = "CHILDPIPE_DEBUG";

/// Environment variable naming the fd log lines are written to.
pub const DEBUG_FD_ENV_VAR: &str = "CHILDPIPE_DEBUG_FD";

bitflags! {
    /// A set of log categories.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Categories: u32 {
        const error = 1 << 0;
        const warning = 1 << 1;
        const exec = 1 << 2;
        const exec_fork = 1 << 3;
        const bridge_pipes = 1 << 4;
        const bridge_pump = 1 << 5;
        const bridge_data = 1 << 6;
        const bridge_reap = 1 << 7;
    }
}

#[rustfmt::skip::macros(categories)]
pub mod categories {
    use super::Categories;

    pub struct category_t {
        pub flag: Categories,
        pub name: &'static str,
        pub description: &'static str,
        pub default_enabled: bool,
    }

    /// Declare the table of all categories, in the order they are listed by `all_categories()`.
    macro_rules! categories {
        (
            $( ($var:ident, $name:literal, $description:literal $(, $enabled:expr)?) );*
            $(;)?
        ) => {
            static ALL: &[category_t] = &[
                $(
                    category_t {
                        flag: Categories::$var,
                        name: $name,
                        description: $description,
                        default_enabled: false $(|| $enabled)?,
                    },
                )*
            ];

            pub fn all_categories() -> &'static [category_t] {
                ALL
            }
        };
    }

    categories!(
        (error, "error", "Serious unexpected errors (on by default)", true);

        (warning, "warning", "Warnings (on by default)", true);

        (exec, "exec", "Errors reported by exec (on by default)", true);

        (exec_fork, "exec-fork", "Calls to fork()");

        (bridge_pipes, "bridge-pipes", "Pipe setup for child processes");

        (bridge_pump, "bridge-pump", "Polling and moving bytes to and from the child");

        (bridge_data, "bridge-data", "Output bytes received from the child");

        (bridge_reap, "bridge-reap", "Reaping the child and its exit status");
    );
}

impl Categories {
    /// The categories which are on unless explicitly disabled.
    pub fn defaults() -> Categories {
        categories::all_categories()
            .iter()
            .filter(|cat| cat.default_enabled)
            .fold(Categories::empty(), |acc, cat| acc | cat.flag)
    }

    /// Return the user-facing name of a single category, or "unknown" for a combined set.
    pub fn name(self) -> &'static str {
        categories::all_categories()
            .iter()
            .find(|cat| cat.flag == self)
            .map_or("unknown", |cat| cat.name)
    }
}

/// FLOG formats values. By default we would like to use Display, and fall back to Debug.
/// However that would require specialization. So instead we make two "separate" traits, bring them both in scope,
/// and let Rust figure it out.
/// Clients can opt a Debug type into Floggable by implementing FloggableDebug:
///    impl FloggableDebug for MyType {}
pub trait FloggableDisplay {
    /// Return a string representation of this thing.
    fn to_flog_str(&self) -> String;
}

impl<T: std::fmt::Display> FloggableDisplay for T {
    fn to_flog_str(&self) -> String {
        self.to_string()
    }
}

pub trait FloggableDebug: std::fmt::Debug {
    fn to_flog_str(&self) -> String {
        format!("{:?}", self)
    }
}

/// A log sink: which categories are enabled, and where lines go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Flog {
    enabled: Categories,
    fd: RawFd,
}

impl Default for Flog {
    fn default() -> Self {
        Flog {
            enabled: Categories::defaults(),
            fd: libc::STDERR_FILENO,
        }
    }
}

impl Flog {
    /// The default categories, written to stderr.
    pub fn new() -> Self {
        Self::default()
    }

    /// A logger which never writes anything.
    pub fn disabled() -> Self {
        Flog {
            enabled: Categories::empty(),
            fd: -1,
        }
    }

    /// Map the classic 0-3 verbosity scale onto categories.
    /// 0 - Quiet (errors, warnings and exec failures)
    /// 1 - fork calls
    /// 2 - 1 + pipe setup and child status
    /// 3 - 2 + every poll pass, read and write, and the output itself
    pub fn from_verbosity(level: u8) -> Self {
        let mut enabled = Categories::defaults();
        if level >= 1 {
            enabled |= Categories::exec_fork;
        }
        if level >= 2 {
            enabled |= Categories::bridge_pipes | Categories::bridge_reap;
        }
        if level >= 3 {
            enabled |= Categories::bridge_pump | Categories::bridge_data;
        }
        Flog {
            enabled,
            fd: libc::STDERR_FILENO,
        }
    }

    /// Build a logger from `CHILDPIPE_DEBUG` and `CHILDPIPE_DEBUG_FD`.
    pub fn from_env() -> Self {
        let mut flog = Self::default();
        if let Ok(fd) = std::env::var(DEBUG_FD_ENV_VAR) {
            match fd.trim().parse::<RawFd>() {
                Ok(fd) => flog.fd = fd,
                Err(_) => flog!(flog, warning, "Ignoring invalid", DEBUG_FD_ENV_VAR, fd),
            }
        }
        if let Ok(patterns) = std::env::var(DEBUG_ENV_VAR) {
            flog.activate_by_pattern(&patterns);
        }
        flog
    }

    /// Send log lines to `fd` instead. A negative fd disables output.
    pub fn with_fd(mut self, fd: RawFd) -> Self {
        self.fd = fd;
        self
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn categories(&self) -> Categories {
        self.enabled
    }

    /// Return whether any of `cats` is enabled and there is somewhere to write to.
    #[inline]
    pub fn enabled(&self, cats: Categories) -> bool {
        self.fd >= 0 && self.enabled.intersects(cats)
    }

    pub fn set_enabled(&mut self, cats: Categories, sense: bool) {
        self.enabled.set(cats, sense);
    }

    /// Enable or disable categories according to a comma-separated list of wildcard patterns.
    /// A leading `-` disables the matching categories; underscores are read as dashes.
    pub fn activate_by_pattern(&mut self, patterns: &str) {
        let normalized = patterns.replace('_', "-");
        for pat in normalized.split(',').map(str::trim) {
            if pat.is_empty() {
                continue;
            }
            match pat.strip_prefix('-') {
                Some(rest) => self.apply_one_wildcard(rest, false),
                None => self.apply_one_wildcard(pat, true),
            }
        }
    }

    /// For each category, if its name matches the wildcard, set its enabled to the given sense.
    fn apply_one_wildcard(&mut self, wc: &str, sense: bool) {
        let mut match_found = false;
        for cat in categories::all_categories() {
            if wildcard_match(cat.name.as_bytes(), wc.as_bytes()) {
                self.enabled.set(cat.flag, sense);
                match_found = true;
            }
        }
        if !match_found {
            flog!(self, warning, "Failed to match debug category:", wc);
        }
    }

    /// Write a preformatted line. Errors are ignored; logging must not fail the caller.
    pub fn write(&self, s: &str) {
        if self.fd < 0 {
            return;
        }
        let _ = write_to_fd(s.as_bytes(), self.fd);
    }
}

pub fn write_to_fd(input: &[u8], fd: RawFd) -> nix::Result<usize> {
    nix::unistd::write(unsafe { BorrowedFd::borrow_raw(fd) }, input)
}

/// Match `s` against a glob supporting `*` and `?`.
fn wildcard_match(s: &[u8], wc: &[u8]) -> bool {
    match wc.split_first() {
        None => s.is_empty(),
        Some((b'*', rest)) => (0..=s.len()).any(|skip| wildcard_match(&s[skip..], rest)),
        Some((&c, rest)) => match s.split_first() {
            Some((&sc, srest)) if c == b'?' || c == sc => wildcard_match(srest, rest),
            _ => false,
        },
    }
}

/// Render bytes for a log line, escaping anything that is not printable ASCII.
pub fn escape_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .flat_map(|&b| std::ascii::escape_default(b))
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{escape_bytes, wildcard_match, Categories, Flog};

    #[test]
    fn test_defaults() {
        let flog = Flog::new();
        assert!(flog.enabled(Categories::error));
        assert!(flog.enabled(Categories::exec));
        assert!(!flog.enabled(Categories::bridge_pump));
        assert!(!Flog::disabled().enabled(Categories::error));
        // Enabled categories still stay quiet without an fd.
        assert!(!Flog::new().with_fd(-1).enabled(Categories::error));
    }

    #[test]
    fn test_verbosity() {
        assert_eq!(Flog::from_verbosity(0).categories(), Categories::defaults());
        let v2 = Flog::from_verbosity(2);
        assert!(v2.enabled(Categories::bridge_reap));
        assert!(!v2.enabled(Categories::bridge_data));
        let v3 = Flog::from_verbosity(3);
        assert!(v3.categories().contains(Categories::all()));
    }

    #[test]
    fn test_patterns() {
        let mut flog = Flog::new().with_fd(-1);
        flog.activate_by_pattern("bridge_*,-bridge-data");
        let cats = flog.categories();
        assert!(cats.contains(Categories::bridge_pipes | Categories::bridge_pump));
        assert!(cats.contains(Categories::bridge_reap));
        assert!(!cats.contains(Categories::bridge_data));

        flog.activate_by_pattern("-*");
        assert!(flog.categories().is_empty());

        flog.activate_by_pattern("exec?fork, nonsense");
        assert_eq!(flog.categories(), Categories::exec_fork);
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match(b"bridge-pump", b"bridge-*"));
        assert!(wildcard_match(b"bridge-pump", b"*pump"));
        assert!(wildcard_match(b"exec", b"e?ec"));
        assert!(!wildcard_match(b"exec-fork", b"exec"));
        assert!(wildcard_match(b"", b"*"));
    }

    #[test]
    fn test_names() {
        assert_eq!(Categories::exec_fork.name(), "exec-fork");
        assert_eq!((Categories::error | Categories::exec).name(), "unknown");
        assert_eq!(escape_bytes(b"hi\n\x00"), "hi\\n\\x00");
    }
}
