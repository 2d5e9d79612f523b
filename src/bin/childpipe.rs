//! Run a program as a filter: everything on our stdin is fed to it, and what it writes to its
//! stdout is collected (up to a fixed capacity) and copied to ours.

#![allow(clippy::uninlined_format_args)]

use childpipe::bridge::{self, BridgeError, Command};
use childpipe::flog::{self, Flog};
use clap::Parser;
use std::ffi::OsString;
use std::io::{self, Read, Write};

const PROGRAM_NAME: &str = "childpipe";

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("BUILD_TARGET_TRIPLE"),
    ", ",
    env!("BUILD_PROFILE"),
    ")"
);

/// Output capacity when none is given.
const DEFAULT_CAPACITY: usize = 1024 * 1024;

/// Exit status for a failure that carries no child status.
const STATUS_FAILURE: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = PROGRAM_NAME, version = VERSION)]
#[command(about = "Feed standard input to PROGRAM and print what it writes, up to CAPACITY bytes")]
struct Cli {
    /// Output capacity in bytes
    #[arg(short, long, value_name = "CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    capacity: usize,

    /// Enable or disable debug categories, e.g. 'bridge-*,-warning'. May be repeated.
    #[arg(short, long, value_name = "PATTERNS", allow_hyphen_values = true)]
    debug: Vec<String>,

    /// Verbosity from 0 to 3
    #[arg(short, long, value_name = "LEVEL", value_parser = clap::value_parser!(u8).range(0..=3))]
    verbose: Option<u8>,

    /// List the debug categories and exit
    #[arg(long)]
    print_debug_categories: bool,

    /// The program to run, followed by its arguments
    #[arg(
        value_name = "PROGRAM",
        num_args = 1..,
        trailing_var_arg = true,
        required_unless_present = "print_debug_categories"
    )]
    program: Vec<OsString>,
}

fn print_debug_categories(out: &mut impl Write) -> io::Result<()> {
    let cats = flog::categories::all_categories();
    // Compute width of longest name.
    let mut name_width = 0;
    for cat in cats.iter() {
        name_width = usize::max(name_width, cat.name.len());
    }
    // A little extra space.
    name_width += 2;
    for cat in cats.iter() {
        writeln!(out, "{:<width$} {}", cat.name, cat.description, width = name_width)?;
    }
    Ok(())
}

/// Layer the command line over `base`, which comes from the environment: -v adds categories and
/// -d patterns have the last word.
fn make_flog(mut base: Flog, cli: &Cli) -> Flog {
    if let Some(level) = cli.verbose {
        base.set_enabled(Flog::from_verbosity(level).categories(), true);
    }
    for patterns in &cli.debug {
        base.activate_by_pattern(patterns);
    }
    base
}

/// Our exit status for a failed call: the child's own status if it has one.
fn exit_status(err: &BridgeError) -> i32 {
    match err {
        BridgeError::NonZeroExit(code) => i32::from(*code),
        _ => STATUS_FAILURE,
    }
}

fn throwing_main() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Usage errors exit with 2, --help and --version with 0.
            let _ = err.print();
            return err.exit_code();
        }
    };

    if cli.print_debug_categories {
        return match print_debug_categories(&mut io::stdout().lock()) {
            Ok(()) => 0,
            Err(_) => STATUS_FAILURE,
        };
    }

    let flog = make_flog(Flog::from_env(), &cli);

    let mut input = Vec::new();
    if let Err(err) = io::stdin().lock().read_to_end(&mut input) {
        let _ = writeln!(io::stderr(), "{}: failed to read input: {}", PROGRAM_NAME, err);
        return STATUS_FAILURE;
    }

    let program = &cli.program[0];
    let command = Command::with_argv(program, &cli.program);
    let mut output = vec![0u8; cli.capacity];
    match bridge::try_run(&flog, &command, &input, &mut output) {
        Ok(len) => {
            let mut stdout = io::stdout().lock();
            if let Err(err) = stdout.write_all(&output[..len]).and_then(|()| stdout.flush()) {
                let _ = writeln!(io::stderr(), "{}: failed to write output: {}", PROGRAM_NAME, err);
                return STATUS_FAILURE;
            }
            0
        }
        Err(err) => {
            let _ = writeln!(
                io::stderr(),
                "{}: {}: {}",
                PROGRAM_NAME,
                program.to_string_lossy(),
                err
            );
            exit_status(&err)
        }
    }
}

fn main() {
    let status = throwing_main();
    std::process::exit(status)
}
