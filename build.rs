#![allow(clippy::uninlined_format_args)]

use rsconf::Target;
use std::error::Error;

fn main() {
    rsconf::rebuild_if_paths_changed(&["src", "Cargo.toml", "build.rs"]);

    rsconf::set_env_value("BUILD_TARGET_TRIPLE", &std::env::var("TARGET").unwrap());
    rsconf::set_env_value("BUILD_PROFILE", &std::env::var("PROFILE").unwrap());

    let build = cc::Build::new();
    let mut target = Target::new_from(build).unwrap();
    target.set_verbose(true);
    detect_cfgs(&mut target);
}

/// Check target system support for certain functionality when the build is invoked.
///
/// We use [`rsconf::declare_cfg()`] rather than cargo features: these describe what the platform
/// supports, not behavior a user would toggle.
#[rustfmt::skip]
fn detect_cfgs(target: &mut Target) {
    for (name, handler) in [
        // Ignore the first entry, it just sets up the type inference.
        (
            "",
            &(|_: &Target| Ok(false)) as &dyn Fn(&Target) -> Result<bool, Box<dyn Error>>,
        ),
        ("apple", &detect_apple),
        ("have_pipe2", &|target| {
            Ok(target.has_symbol("pipe2"))
        }),
    ] {
        match handler(target) {
            Err(e) => {
                rsconf::warn!("{}: {}", name, e);
                rsconf::declare_cfg(name, false);
            },
            Ok(enabled) => rsconf::declare_cfg(name, enabled),
        }
    }
}

fn detect_apple(_: &Target) -> Result<bool, Box<dyn Error>> {
    // Build scripts run on the host, so ask Cargo about the target.
    let os = std::env::var("CARGO_CFG_TARGET_OS")?;
    Ok(os == "macos" || os == "ios")
}
