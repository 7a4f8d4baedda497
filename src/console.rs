//! Console output
//!
//! Single place for every line the operator sees: phase headers, inline
//! warnings, the failure summary and the closing banner. Color is applied with
//! crossterm and can be switched off entirely. Output goes to stdout unless a
//! writer is supplied; fatal errors always go to stderr.

use crate::config::ColorMode;
use crossterm::style::{Color, Stylize, style};
use std::io::{IsTerminal, Write};

const BANNER_WIDTH: usize = 66;

/// Manual steps the operator must perform after provisioning
pub const MANUAL_STEPS: &[&str] = &[
    "Run 'sudo raspi-config'",
    "Interface Options > SSH: enable remote access",
    "Interface Options > Camera: enable the camera interface",
    "Reboot the Raspberry Pi",
];

/// Colorized (or plain) console writer
pub struct Console {
    color: bool,
    out: Box<dyn Write>,
}

impl Console {
    /// Resolve the color policy against the environment
    pub fn new(mode: ColorMode) -> Self {
        let color = match mode {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => {
                std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
            }
        };
        Self::with_writer(color, std::io::stdout())
    }

    pub fn plain() -> Self {
        Self::with_writer(false, std::io::stdout())
    }

    /// Write to `out` instead of stdout
    pub fn with_writer(color: bool, out: impl Write + 'static) -> Self {
        Self {
            color,
            out: Box::new(out),
        }
    }

    fn emit(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{}", line).and_then(|()| self.out.flush()) {
            tracing::debug!("Console write failed: {}", e);
        }
    }

    pub fn is_colored(&self) -> bool {
        self.color
    }

    fn paint(&self, text: &str, color: Color, bold: bool) -> String {
        if !self.color {
            return text.to_string();
        }
        let styled = style(text).with(color);
        if bold {
            styled.bold().to_string()
        } else {
            styled.to_string()
        }
    }

    pub fn phase_line(&self, title: &str) -> String {
        self.paint(&format!("==> {}", title), Color::Cyan, true)
    }

    pub fn warning_line(&self, message: &str) -> String {
        self.paint(&format!("WARNING: {}", message), Color::Yellow, false)
    }

    pub fn error_line(&self, message: &str) -> String {
        self.paint(&format!("ERROR: {}", message), Color::Red, true)
    }

    /// Print a phase header
    pub fn phase(&mut self, title: &str) {
        let line = self.phase_line(title);
        self.emit("");
        self.emit(&line);
    }

    pub fn info(&mut self, message: &str) {
        self.emit(&format!("    {}", message));
    }

    /// Inline warning; the run continues
    pub fn warning(&mut self, message: &str) {
        let line = self.warning_line(message);
        self.emit(&line);
    }

    /// Fatal error, printed to stderr
    pub fn error(&self, message: &str) {
        eprintln!("{}", self.error_line(message));
    }

    /// Lines of the failure summary; empty input gives a one-line all-clear
    pub fn summary_lines(&self, failures: &[String]) -> Vec<String> {
        if failures.is_empty() {
            return vec![self.paint("All provisioning steps succeeded.", Color::Green, true)];
        }

        let mut lines = vec![self.paint(
            &format!("{} step(s) reported problems:", failures.len()),
            Color::Yellow,
            true,
        )];
        lines.extend(failures.iter().map(|f| format!("  - {}", f)));
        lines.push("Re-run the tool to retry; every step is safe to repeat.".to_string());
        lines
    }

    pub fn summary(&mut self, failures: &[String]) {
        self.emit("");
        for line in self.summary_lines(failures) {
            self.emit(&line);
        }
    }

    /// Closing banner with the manual post-steps
    pub fn banner_lines(&self) -> Vec<String> {
        let rule = "═".repeat(BANNER_WIDTH);
        let title = format!("{:<width$}", "  Pilomar setup complete", width = BANNER_WIDTH);

        let mut lines = vec![
            self.paint(&format!("╔{}╗", rule), Color::Green, true),
            self.paint(&format!("║{}║", title), Color::Green, true),
            self.paint(&format!("╚{}╝", rule), Color::Green, true),
            "Finish the installation manually:".to_string(),
        ];
        lines.extend(
            MANUAL_STEPS
                .iter()
                .enumerate()
                .map(|(i, step)| format!("  {}. {}", i + 1, step)),
        );
        lines
    }

    pub fn banner(&mut self) {
        self.emit("");
        for line in self.banner_lines() {
            self.emit(&line);
        }
    }
}
