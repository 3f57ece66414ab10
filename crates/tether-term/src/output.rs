use std::{
    io::{self, Write},
    result::Result as StdResult,
    time::Duration,
};

use indicatif::{ProgressBar, ProgressStyle};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use thiserror::Error;

/// Column width used when wrapping long messages.
const WRAP_WIDTH: usize = 100;

/// Errors produced by [`Output`] implementations when writing to the terminal.
#[derive(Debug, Error)]
pub enum OutputError {
    /// A terminal/TTY related failure occurred.
    #[error("Terminal error: {0}")]
    Terminal(String),

    /// Underlying I/O error while writing to the terminal.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias for output-related fallible operations.
pub type Result<T> = StdResult<T, OutputError>;

/// Abstraction over how user-facing messages are produced.
///
/// Implementations can render to a terminal, suppress output, or emit to other
/// formats (e.g. files or JSON) in the future.
pub trait Output: Send + Sync {
    /// Print an informational message.
    fn message(&self, msg: &str) -> Result<()>;
    /// Print a success message.
    fn success(&self, msg: &str) -> Result<()>;
    /// Print a warning message.
    fn warn(&self, msg: &str) -> Result<()>;
    /// Print an error/failure message.
    fn fail(&self, msg: &str) -> Result<()>;
    /// Print a dimmed detail line.
    fn detail(&self, msg: &str) -> Result<()>;
    /// Start a spinner labelled with `label`.
    fn spinner(&self, label: &str) -> Spinner;
    /// Flush any buffered output.
    fn finish(&self) -> Result<()>;
}

/// Output implementation that suppresses all messages. Useful for
/// non-interactive or test environments.
pub struct Quiet;

impl Output for Quiet {
    fn message(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn success(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn warn(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn fail(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn detail(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn spinner(&self, _label: &str) -> Spinner {
        Spinner::disabled()
    }

    fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Color-capable terminal renderer for user messages.
pub struct Terminal {
    /// Whether to emit ANSI color sequences when writing to stdout.
    color_choice: ColorChoice,
}

impl Terminal {
    /// Create a new terminal output.
    ///
    /// - `color`: when `true`, always render colored output; when `false`,
    ///   disable ANSI colors.
    pub fn new(color: bool) -> Self {
        let color_choice = if color {
            ColorChoice::Always
        } else {
            ColorChoice::Never
        };
        Self { color_choice }
    }

    /// Write `msg` using `color`, wrapping long lines to the terminal width.
    fn write_colored(&self, msg: &str, color: Color) -> Result<()> {
        let mut stdout = StandardStream::stdout(self.color_choice);
        stdout.set_color(ColorSpec::new().set_fg(Some(color)))?;
        for line in textwrap::wrap(msg, WRAP_WIDTH) {
            writeln!(stdout, "{line}")?;
        }
        stdout.reset()?;
        stdout.flush()?;
        Ok(())
    }
}

impl Output for Terminal {
    fn message(&self, msg: &str) -> Result<()> {
        let mut stdout = StandardStream::stdout(self.color_choice);
        for line in textwrap::wrap(msg, WRAP_WIDTH) {
            writeln!(stdout, "{line}")?;
        }
        stdout.flush()?;
        Ok(())
    }

    fn success(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Color::Green)
    }

    fn warn(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Color::Yellow)
    }

    fn fail(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Color::Red)
    }

    fn detail(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Color::Cyan)
    }

    fn spinner(&self, label: &str) -> Spinner {
        Spinner::start(label)
    }

    fn finish(&self) -> Result<()> {
        let mut stdout = StandardStream::stdout(self.color_choice);
        stdout.reset()?;
        stdout.flush()?;
        Ok(())
    }
}

/// A live spinner attached to a long-running operation.
///
/// Dropping a spinner without finishing it clears the line.
pub struct Spinner {
    /// Backing progress bar; `None` when output is suppressed.
    bar: Option<ProgressBar>,
}

impl Spinner {
    /// Create a spinner that renders nothing.
    pub(crate) fn disabled() -> Self {
        Self { bar: None }
    }

    /// Start a ticking spinner with the given label.
    pub(crate) fn start(label: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::default_spinner());
        bar.set_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar: Some(bar) }
    }

    /// Update the spinner label.
    pub fn set_message(&self, msg: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(msg.to_string());
        }
    }

    /// Stop the spinner, replacing it with a final success message.
    pub fn finish_success(self, msg: &str) {
        if let Some(bar) = self.bar {
            bar.finish_with_message(msg.to_string());
        }
    }

    /// Stop the spinner, replacing it with a final failure message.
    pub fn finish_fail(self, msg: &str) {
        if let Some(bar) = self.bar {
            bar.abandon_with_message(msg.to_string());
        }
    }
}
