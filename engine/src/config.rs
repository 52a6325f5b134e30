//! Runtime configuration from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `CSVX_SEPARATOR` | `;` (`\t` accepted) |
//! | `CSVX_CHARSET` | `utf-8` (`auto` detects on import) |
//! | `CSVX_PROGRESS_FREQUENCY` | `100` items per batch |
//! | `CSVX_PROGRESS_DELAY_MS` | `1` |
//! | `CSVX_BUSY_AFTER_MS` | `500`, `0` disables |
//! | `CSVX_STORE` | `.csvx/store.json` |
//! | `CSVX_TABLE` | `records` |
//! | `CSVX_KEY` | none |
//!
//! A `.env` file in the working directory is loaded first.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::api::logs::log_warning;
use crate::models::{TableSpec, DEFAULT_CHARSET, DEFAULT_SEPARATOR};
use crate::progress::{Pacing, MAX_FREQUENCY};

const DEFAULT_STORE: &str = ".csvx/store.json";
const DEFAULT_TABLE: &str = "records";

/// Engine settings shared by the CLI and the HTTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
    pub separator: char,
    pub charset: String,
    pub pacing: Pacing,
    /// JSON file backing the in-memory list.
    pub store: PathBuf,
    /// Table created when the store file does not exist yet.
    pub table: String,
    pub key: Option<String>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR,
            charset: DEFAULT_CHARSET.to_string(),
            pacing: Pacing::default(),
            store: PathBuf::from(DEFAULT_STORE),
            table: DEFAULT_TABLE.to_string(),
            key: None,
        }
    }
}

impl ExchangeConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read the configuration through `lookup`. Invalid values keep their
    /// default and are reported.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = lookup("CSVX_SEPARATOR") {
            match parse_separator(&value) {
                Some(separator) => config.separator = separator,
                None => invalid("CSVX_SEPARATOR", &value),
            }
        }
        if let Some(value) = lookup("CSVX_CHARSET").filter(|v| !v.trim().is_empty()) {
            config.charset = value.trim().to_string();
        }
        if let Some(value) = lookup("CSVX_PROGRESS_FREQUENCY") {
            match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.pacing.frequency = n.min(MAX_FREQUENCY),
                _ => invalid("CSVX_PROGRESS_FREQUENCY", &value),
            }
        }
        if let Some(value) = lookup("CSVX_PROGRESS_DELAY_MS") {
            match value.trim().parse::<u64>() {
                Ok(ms) => config.pacing.delay = Duration::from_millis(ms),
                Err(_) => invalid("CSVX_PROGRESS_DELAY_MS", &value),
            }
        }
        if let Some(value) = lookup("CSVX_BUSY_AFTER_MS") {
            match value.trim().parse::<u64>() {
                Ok(0) => config.pacing.busy_after = None,
                Ok(ms) => config.pacing.busy_after = Some(Duration::from_millis(ms)),
                Err(_) => invalid("CSVX_BUSY_AFTER_MS", &value),
            }
        }
        if let Some(value) = lookup("CSVX_STORE").filter(|v| !v.trim().is_empty()) {
            config.store = PathBuf::from(value.trim());
        }
        if let Some(value) = lookup("CSVX_TABLE").filter(|v| !v.trim().is_empty()) {
            config.table = value.trim().to_string();
        }
        if let Some(value) = lookup("CSVX_KEY").filter(|v| !v.trim().is_empty()) {
            config.key = Some(value.trim().to_string());
        }

        config
    }

    /// Table description used when the store is created.
    pub fn table_spec(&self) -> TableSpec {
        let mut spec = TableSpec::new(self.table.clone());
        spec.key = self.key.clone();
        spec
    }
}

/// Parse a one-character separator; `\t` and `tab` name the tab character.
pub fn parse_separator(value: &str) -> Option<char> {
    match value {
        "\\t" | "tab" => Some('\t'),
        _ => {
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c != '"' && c != '\\' && c != '\n' && c != '\r' => Some(c),
                _ => None,
            }
        }
    }
}

fn invalid(name: &str, value: &str) {
    log_warning(format!("Ignoring invalid {name}={value:?}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ExchangeConfig {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ExchangeConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]);
        assert_eq!(c, ExchangeConfig::default());
        assert_eq!(c.separator, ';');
        assert_eq!(c.charset, "utf-8");
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("CSVX_SEPARATOR", "\\t"),
            ("CSVX_CHARSET", "windows-1252"),
            ("CSVX_PROGRESS_FREQUENCY", "10"),
            ("CSVX_PROGRESS_DELAY_MS", "0"),
            ("CSVX_BUSY_AFTER_MS", "0"),
            ("CSVX_KEY", "code"),
        ]);
        assert_eq!(c.separator, '\t');
        assert_eq!(c.charset, "windows-1252");
        assert_eq!(c.pacing.frequency, 10);
        assert_eq!(c.pacing.delay, Duration::ZERO);
        assert_eq!(c.pacing.busy_after, None);
        assert_eq!(c.table_spec().key.as_deref(), Some("code"));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let c = config(&[("CSVX_SEPARATOR", ";;"), ("CSVX_PROGRESS_FREQUENCY", "0")]);
        assert_eq!(c.separator, ';');
        assert_eq!(c.pacing.frequency, Pacing::default().frequency);
    }

    #[test]
    fn test_huge_frequency_is_bounded() {
        let c = config(&[("CSVX_PROGRESS_FREQUENCY", "18446744073709551615")]);
        assert_eq!(c.pacing.frequency, MAX_FREQUENCY);
    }

    #[test]
    fn test_parse_separator() {
        assert_eq!(parse_separator(","), Some(','));
        assert_eq!(parse_separator("tab"), Some('\t'));
        assert_eq!(parse_separator("\""), None);
        assert_eq!(parse_separator(""), None);
    }
}
