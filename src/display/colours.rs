//! Status colouring for terminal output
//!
//! Honours `NO_COLOR` and `--no-color`; plain text otherwise.

use colored::{ColoredString, Colorize};

#[derive(Debug, Clone, Copy)]
pub struct ColourManager {
    enabled: bool,
}

impl ColourManager {
    /// Colours on unless `NO_COLOR` is set
    pub fn new() -> Self {
        Self { enabled: std::env::var_os("NO_COLOR").is_none() }
    }

    pub fn with_colours(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Build from the `--no-color` flag
    pub fn from_args(no_color_flag: bool) -> Self {
        if no_color_flag {
            Self::with_colours(false)
        } else {
            Self::new()
        }
    }

    pub fn colours_enabled(&self) -> bool {
        self.enabled
    }

    pub fn error(&self, text: &str) -> ColoredString {
        self.paint(text, |t| t.red().bold())
    }

    pub fn warning(&self, text: &str) -> ColoredString {
        self.paint(text, |t| t.yellow())
    }

    pub fn success(&self, text: &str) -> ColoredString {
        self.paint(text, |t| t.green())
    }

    pub fn muted(&self, text: &str) -> ColoredString {
        self.paint(text, |t| t.bright_black())
    }

    pub fn highlight(&self, text: &str) -> ColoredString {
        self.paint(text, |t| t.cyan().bold())
    }

    fn paint(&self, text: &str, style: impl Fn(&str) -> ColoredString) -> ColoredString {
        if self.enabled {
            style(text)
        } else {
            text.normal()
        }
    }
}

impl Default for ColourManager {
    fn default() -> Self {
        Self::new()
    }
}
