//! Human and machine-readable command output.
//!
//! Human output goes to stdout with status glyphs; with `--json` only the
//! final JSON document is printed so the output can be piped.

use colored::Colorize;
use is_terminal::IsTerminal;
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub struct OutputContext {
    json: bool,
}

impl OutputContext {
    pub fn new(json: bool) -> Self {
        let no_color = std::env::var_os("NO_COLOR").is_some();
        if no_color || !std::io::stdout().is_terminal() {
            colored::control::set_override(false);
        }
        Self { json }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn header(&self, title: &str) {
        if !self.json {
            println!("\n{}", title.bold());
        }
    }

    pub fn success(&self, message: &str) {
        if !self.json {
            println!("  {} {}", "✓".green(), message);
        }
    }

    pub fn warning(&self, message: &str) {
        if !self.json {
            println!("  {} {}", "⚠".yellow(), message);
        }
    }

    pub fn failure(&self, message: &str) {
        if !self.json {
            println!("  {} {}", "✗".red(), message);
        }
    }

    pub fn info(&self, message: &str) {
        if !self.json {
            println!("  {} {}", "•".dimmed(), message);
        }
    }

    /// Free text, e.g. a public key the operator has to copy.
    pub fn plain(&self, text: &str) {
        if !self.json {
            println!("{text}");
        }
    }

    pub fn key_value(&self, key: &str, value: &str) {
        if !self.json {
            println!("  {:<28} {}", key.dimmed(), value);
        }
    }

    pub fn print_json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}
