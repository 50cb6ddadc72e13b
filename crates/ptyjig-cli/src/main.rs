//! ptyjig: run a command under a pseudo-terminal, feeding it standard input
//! one keystroke at a time and copying its terminal output to standard
//! output.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use ptyjig_core::config::seconds;
use ptyjig_core::{Outcome, Session, TimingConfig};

/// ptyjig: drive interactive programs through a pseudo-terminal
#[derive(Parser, Debug)]
#[command(name = "ptyjig", version, about = "Run a command under a pty and type standard input into it")]
struct Cli {
    /// Do not send the terminal EOF character when input runs out
    #[arg(short = 'e', long = "no-eof")]
    no_eof: bool,

    /// Ignore interrupt, quit and stop signals in the command
    #[arg(short = 's', long = "suppress-interrupts")]
    suppress_interrupts: bool,

    /// Do not copy the command's output to standard output
    #[arg(short = 'x', long = "no-mirror")]
    no_mirror: bool,

    /// Record the keystrokes sent to the command (CR written as LF)
    #[arg(short = 'i', long = "input-capture", value_name = "FILE")]
    input_capture: Option<PathBuf>,

    /// Record everything the command writes to its terminal
    #[arg(short = 'o', long = "output-capture", value_name = "FILE")]
    output_capture: Option<PathBuf>,

    /// Delay between keystrokes, in (fractional) seconds
    #[arg(short = 'd', long = "keystroke-delay", value_name = "SECONDS")]
    keystroke_delay: Option<f64>,

    /// Seconds of silence tolerated after input runs out (0 disables)
    #[arg(short = 't', long = "idle-timeout", value_name = "SECONDS")]
    idle_timeout: Option<u64>,

    /// Delay before the first keystroke, in (fractional) seconds
    #[arg(short = 'w', long = "start-delay", value_name = "SECONDS")]
    start_delay: Option<f64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Config file path
    #[arg(long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Command to run and its arguments
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<String>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };

    init_tracing(cli.verbose);

    let outcome = match run(cli) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("ptyjig: {e:#}");
            std::process::exit(1);
        }
    };
    outcome.exit()
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "ptyjig=debug,ptyjig_core=debug"
    } else {
        "ptyjig=warn,ptyjig_core=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .init();
}

fn run(cli: Cli) -> Result<Outcome> {
    let file = match cli.config.clone().or_else(config::default_path) {
        Some(path) => config::Config::load(&path)?,
        None => config::Config::default(),
    };

    // CLI overrides config.
    let mut session_cfg = file.session_config(cli.command)?;
    if cli.no_eof {
        session_cfg.send_eof = false;
    }
    if cli.suppress_interrupts {
        session_cfg.suppress_interrupts = true;
    }
    if cli.no_mirror {
        session_cfg.mirror_output = false;
    }
    if let Some(delay) = cli.keystroke_delay {
        session_cfg.timing.keystroke_delay = seconds(delay).context("invalid -d value")?;
    }
    if let Some(delay) = cli.start_delay {
        session_cfg.timing.start_delay = seconds(delay).context("invalid -w value")?;
    }
    if let Some(secs) = cli.idle_timeout {
        session_cfg.timing.idle_timeout = TimingConfig::idle_timeout_secs(secs);
    }
    session_cfg.input_capture = cli.input_capture;
    session_cfg.output_capture = cli.output_capture;

    debug!(?session_cfg, "starting session");
    let program = session_cfg.program().to_string();

    // Fork happens here, before any runtime threads exist.
    let session = Session::spawn(session_cfg)
        .with_context(|| format!("failed to start {program}"))?;
    debug!(pid = session.pid().as_raw(), "executor ready");

    let outcome = session.run().context("session failed")?;
    if let Some(message) = outcome.message(&program) {
        println!("{message}");
    }
    Ok(outcome)
}
