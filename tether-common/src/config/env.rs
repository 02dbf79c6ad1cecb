//! `TETHER_*` environment overrides.
//!
//! Every tether setting that can be overridden from the environment goes
//! through [`EnvParser`], which collects errors instead of failing on the
//! first one so all problems are reported together.

use super::source::Sourced;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("{var}={value:?} is not a valid {expected}")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("{var}={value:?} is not a duration (try 2s, 500ms)")]
    InvalidDuration { var: String, value: String },

    #[error("{var}={value} is outside {min}..={max}")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("{var}={value:?} is not a log level (trace, debug, info, warn, error, off)")]
    InvalidLogLevel { var: String, value: String },
}

/// Reads `TETHER_*` variables, recording where each value came from.
///
/// Invalid values fall back to the default and are remembered; callers
/// check [`EnvParser::has_errors`] once all variables are read.
#[derive(Debug, Default)]
pub struct EnvParser {
    errors: Vec<EnvError>,
}

const PREFIX: &str = "TETHER_";

impl EnvParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// `(full variable name, raw value)` when the variable is set.
    fn lookup(name: &str) -> (String, Option<String>) {
        let var = format!("{PREFIX}{name}");
        let value = env::var(&var).ok();
        (var, value)
    }

    /// Non-blank string, or `None`.
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        match Self::lookup(name) {
            (var, Some(value)) if !value.trim().is_empty() => Sourced::from_env(Some(value), var),
            _ => Sourced::default_value(None),
        }
    }

    /// Accepts 1/true/yes/on and 0/false/no/off.
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let (var, Some(value)) = Self::lookup(name) else {
            return Sourced::default_value(default);
        };
        match parse_bool_string(&value) {
            Some(parsed) => Sourced::from_env(parsed, var),
            None => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected: "boolean (true/false, yes/no, on/off, 1/0)".to_string(),
                    value,
                });
                Sourced::default_value(default)
            }
        }
    }

    pub fn get_u16_range(&mut self, name: &str, default: u16, min: u16, max: u16) -> Sourced<u16> {
        self.get_range(name, default, min..=max, "port number")
    }

    pub fn get_u32_range(&mut self, name: &str, default: u32, min: u32, max: u32) -> Sourced<u32> {
        self.get_range(name, default, min..=max, "unsigned integer")
    }

    fn get_range<T>(&mut self, name: &str, default: T, range: RangeInclusive<T>, expected: &str) -> Sourced<T>
    where
        T: FromStr + PartialOrd + fmt::Display,
    {
        let (var, Some(value)) = Self::lookup(name) else {
            return Sourced::default_value(default);
        };
        match value.trim().parse::<T>() {
            Ok(n) if range.contains(&n) => Sourced::from_env(n, var),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var,
                    value: n.to_string(),
                    min: range.start().to_string(),
                    max: range.end().to_string(),
                });
                Sourced::default_value(default)
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected: expected.to_string(),
                    value,
                });
                Sourced::default_value(default)
            }
        }
    }

    /// humantime form: "2s", "500ms", "1m 30s".
    pub fn get_duration(&mut self, name: &str, default: Duration) -> Sourced<Duration> {
        let (var, Some(value)) = Self::lookup(name) else {
            return Sourced::default_value(default);
        };
        match humantime::parse_duration(value.trim()) {
            Ok(duration) => Sourced::from_env(duration, var),
            Err(_) => {
                self.errors.push(EnvError::InvalidDuration { var, value });
                Sourced::default_value(default)
            }
        }
    }

    /// Path with `~` and `$VAR` expanded; blank counts as unset.
    pub fn get_path(&mut self, name: &str) -> Sourced<Option<PathBuf>> {
        match Self::lookup(name) {
            (var, Some(value)) if !value.trim().is_empty() => {
                let expanded = shellexpand::full(value.trim())
                    .map(|s| s.into_owned())
                    .unwrap_or(value);
                Sourced::from_env(Some(PathBuf::from(expanded)), var)
            }
            _ => Sourced::default_value(None),
        }
    }

    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let (var, Some(value)) = Self::lookup(name) else {
            return Sourced::default_value(default.to_string());
        };
        match parse_log_level_string(&value) {
            Some(level) => Sourced::from_env(level, var),
            None => {
                self.errors.push(EnvError::InvalidLogLevel { var, value });
                Sourced::default_value(default.to_string())
            }
        }
    }
}

pub(crate) fn parse_bool_string(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_log_level_string(value: &str) -> Option<String> {
    let lower = value.trim().to_lowercase();
    match lower.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" | "off" => Some(lower),
        "warning" => Some("warn".to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::ConfigSource;
    use serial_test::serial;

    fn set_env(key: &str, value: &str) {
        // SAFETY: tests touching the environment are serialized.
        unsafe { env::set_var(key, value) };
    }

    fn cleanup_env(keys: &[&str]) {
        for key in keys {
            // SAFETY: tests touching the environment are serialized.
            unsafe { env::remove_var(key) };
        }
    }

    #[test]
    #[serial]
    fn test_get_bool_true_values() {
        let var = "TETHER_TEST_BOOL";
        for value in ["1", "true", "TRUE", "yes", "on"] {
            set_env(var, value);
            let mut parser = EnvParser::new();
            let result = parser.get_bool("TEST_BOOL", false);
            assert!(result.value, "{value} should parse as true");
            assert!(result.is_from_env());
        }
        cleanup_env(&[var]);
    }

    #[test]
    #[serial]
    fn test_get_bool_invalid_uses_default() {
        let var = "TETHER_TEST_BOOL_BAD";
        set_env(var, "maybe");
        let mut parser = EnvParser::new();
        let result = parser.get_bool("TEST_BOOL_BAD", true);
        assert!(result.value);
        assert_eq!(result.source, ConfigSource::Default);
        assert!(parser.has_errors());
        cleanup_env(&[var]);
    }

    #[test]
    #[serial]
    fn test_get_u16_range_out_of_range() {
        let var = "TETHER_TEST_PORT";
        set_env(var, "0");
        let mut parser = EnvParser::new();
        let result = parser.get_u16_range("TEST_PORT", 11434, 1, u16::MAX);
        assert_eq!(result.value, 11434);
        assert!(matches!(parser.errors()[0], EnvError::OutOfRange { .. }));
        cleanup_env(&[var]);
    }

    #[test]
    #[serial]
    fn test_get_u16_range_valid() {
        let var = "TETHER_TEST_PORT_OK";
        set_env(var, " 18080 ");
        let mut parser = EnvParser::new();
        let result = parser.get_u16_range("TEST_PORT_OK", 11434, 1, u16::MAX);
        assert_eq!(result.value, 18080);
        assert_eq!(result.source, ConfigSource::Env(var.to_string()));
        assert!(!parser.has_errors());
        cleanup_env(&[var]);
    }

    #[test]
    #[serial]
    fn test_get_duration_humantime() {
        let var = "TETHER_TEST_INTERVAL";
        set_env(var, "1500ms");
        let mut parser = EnvParser::new();
        let result = parser.get_duration("TEST_INTERVAL", Duration::from_secs(2));
        assert_eq!(result.value, Duration::from_millis(1500));

        set_env(var, "soon");
        let result = parser.get_duration("TEST_INTERVAL", Duration::from_secs(2));
        assert_eq!(result.value, Duration::from_secs(2));
        assert!(matches!(parser.errors()[0], EnvError::InvalidDuration { .. }));
        cleanup_env(&[var]);
    }

    #[test]
    #[serial]
    fn test_get_optional_string_empty_is_unset() {
        let var = "TETHER_TEST_OPT";
        set_env(var, "   ");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_optional_string("TEST_OPT").value, None);
        set_env(var, "ada");
        assert_eq!(
            parser.get_optional_string("TEST_OPT").value.as_deref(),
            Some("ada")
        );
        cleanup_env(&[var]);
    }

    #[test]
    fn test_parse_log_level_string() {
        assert_eq!(parse_log_level_string("INFO").as_deref(), Some("info"));
        assert_eq!(parse_log_level_string("warning").as_deref(), Some("warn"));
        assert_eq!(parse_log_level_string("loud"), None);
    }

    mod proptest_tests {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_parse_bool_no_panic(s in ".*") {
                let _ = parse_bool_string(&s);
            }

            #[test]
            fn test_parse_log_level_valid_only(s in "[a-zA-Z]{0,10}") {
                if let Some(level) = parse_log_level_string(&s) {
                    prop_assert!(["trace", "debug", "info", "warn", "error", "off"].contains(&level.as_str()));
                }
            }
        }
    }
}
