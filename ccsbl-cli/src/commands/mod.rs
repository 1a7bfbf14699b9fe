//! Command implementations.
//!
//! Each group of subcommands lives in its own module. Commands that talk to
//! the device go through [`with_session`], which connects, runs the command
//! and resets the device afterwards.

pub(crate) mod completions;
pub(crate) mod device;
pub(crate) mod flash;
pub(crate) mod memory;

use anyhow::{Context, Result};
use ccsbl::{ConnectOptions, EventSink, NativePort, SerialConfig, Session, SessionState};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, warn};

use crate::config::Config;
use crate::{Cli, get_port, use_fancy_output};

/// Progress bar shared between a command and its session.
#[derive(Clone)]
pub(crate) struct Ui {
    bar: ProgressBar,
    quiet: bool,
}

impl Ui {
    fn new(quiet: bool) -> Self {
        let bar = if quiet || !use_fancy_output() {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(100);
            #[allow(clippy::unwrap_used)] // Static template string
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                    .unwrap()
                    .progress_chars("#>-"),
            );
            bar.set_draw_target(ProgressDrawTarget::stderr());
            bar
        };
        Self { bar, quiet }
    }

    /// Start a new step on the bar.
    pub(crate) fn step(&self, message: &str) {
        self.bar.reset();
        self.bar.set_message(message.to_string());
    }

    /// Print a line on stderr without tearing the bar.
    pub(crate) fn note(&self, icon: console::StyledObject<&str>, message: &str) {
        if !self.quiet {
            self.bar.suspend(|| eprintln!("{icon} {message}"));
        }
    }

    /// Complete the bar.
    pub(crate) fn done(&self) {
        self.bar.finish_and_clear();
    }
}

/// Session sink that drives the progress bar.
struct ProgressSink {
    bar: ProgressBar,
}

impl EventSink for ProgressSink {
    fn on_status(&mut self, text: &str, is_error: bool) {
        if is_error {
            // The error itself reaches the user through the command's result.
            debug!("{text}");
        } else {
            self.bar.set_message(text.to_string());
        }
    }

    fn on_progress(&mut self, percent: u32) {
        self.bar.set_position(u64::from(percent));
    }
}

/// Connect to the device, run `body`, then reset the device and release
/// the port.
///
/// The reset is skipped when the session is no longer connected, e.g. after
/// the bootloader was disabled by written data.
pub(crate) fn with_session<T>(
    cli: &Cli,
    config: &mut Config,
    body: impl FnOnce(&mut Session<NativePort>, &Ui) -> Result<T>,
) -> Result<T> {
    let port = get_port(cli, config)?;
    let baud = cli.baud(config);
    let family = cli.family(config);
    let ui = Ui::new(cli.quiet);

    ui.note(
        style("🔌").cyan(),
        &format!("Using {port} @ {baud} baud ({family})"),
    );

    let options = ConnectOptions::default()
        .with_entry(cli.entry(config).into())
        .with_xosc(cli.xosc);
    let mut session = Session::open(&SerialConfig::new(&port, baud), family)
        .with_context(|| format!("Cannot open {port}"))?
        .with_options(options)
        .with_sink(ProgressSink {
            bar: ui.bar.clone(),
        });

    ui.note(style("⏳").yellow(), "Connecting to bootloader...");
    let info = session
        .connect()
        .with_context(|| format!("No bootloader answered on {port}"))?;
    ui.note(style("✓").green(), &format!("Connected: {info}"));

    let result = body(&mut session, &ui);
    ui.done();

    if session.state() == SessionState::Ready {
        match session.reset() {
            Ok(()) => ui.note(style("🔄").cyan(), "Device reset"),
            Err(e) if result.is_ok() => return Err(e).context("Resetting device"),
            Err(e) => warn!("Reset after failure also failed: {e}"),
        }
    }
    if let Err(e) = session.close() {
        debug!("Closing port: {e}");
    }

    result
}
