//! Human-readable status output.
//!
//! Status lines are the user-facing progress signal of the pipeline; the
//! process exit code stays the only machine-readable result. Markers are
//! colored only when the target stream is a terminal.

use cyrup_termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use std::io::{self, IsTerminal, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Stdout,
    Stderr,
}

/// Writes status lines to stdout and warnings/errors to stderr.
#[derive(Debug, Clone)]
pub struct OutputManager {
    verbose: bool,
    quiet: bool,
}

impl OutputManager {
    /// Creates an output manager.
    ///
    /// `quiet` suppresses everything except warnings and errors; `verbose`
    /// enables indented command output.
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self { verbose, quiet }
    }

    /// Stage header.
    pub fn section(&self, title: &str) {
        if !self.quiet {
            self.write(Target::Stdout, "\n==>", Some(Color::Cyan), true, title);
        }
    }

    pub fn progress(&self, message: &str) {
        if !self.quiet {
            self.write(Target::Stdout, "  »", Some(Color::Blue), false, message);
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            self.write(Target::Stdout, "  ✓", Some(Color::Green), true, message);
        }
    }

    pub fn warn(&self, message: &str) {
        self.write(Target::Stderr, "  ⚠", Some(Color::Yellow), true, message);
    }

    pub fn error(&self, message: &str) {
        self.write(Target::Stderr, "  ✗", Some(Color::Red), true, message);
    }

    /// Indented detail, e.g. streamed tool output. Verbose mode only.
    pub fn indent(&self, message: &str) {
        if self.verbose && !self.quiet {
            self.write(Target::Stdout, "     ", None, false, message);
        }
    }

    /// Diagnostic line shown in verbose mode only.
    pub fn verbose(&self, message: &str) {
        if self.verbose && !self.quiet {
            self.write(Target::Stdout, "  ·", Some(Color::White), false, message);
        }
    }

    fn write(&self, target: Target, marker: &str, color: Option<Color>, bold: bool, message: &str) {
        let mut stream = match target {
            Target::Stdout => StandardStream::stdout(color_choice(io::stdout().is_terminal())),
            Target::Stderr => StandardStream::stderr(color_choice(io::stderr().is_terminal())),
        };
        let mut spec = ColorSpec::new();
        spec.set_fg(color).set_bold(bold);

        if let Err(e) = write_line(&mut stream, &spec, marker, message) {
            log::debug!("{:?} closed, dropping status line {:?}: {}", target, message, e);
        }
    }
}

/// Colors are only emitted for terminals; `Auto` still honours `NO_COLOR`
/// and `TERM=dumb`.
fn color_choice(is_terminal: bool) -> ColorChoice {
    if is_terminal {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

fn write_line(
    stream: &mut impl WriteColor,
    spec: &ColorSpec,
    marker: &str,
    message: &str,
) -> io::Result<()> {
    stream.set_color(spec)?;
    write!(stream, "{}", marker)?;
    stream.reset()?;
    writeln!(stream, " {}", message)
}
