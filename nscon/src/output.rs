//! `OutputMap`: the ordered `(key, value)` sequence the CLI commands print
//! their result in. Output formatting itself (styling, destinations beyond
//! stdout/`--nscon-output-fd`) is a thin collaborator out of scope for this
//! crate's core; this is just the shape the data travels in.

use std::io::Write;

use once_cell::sync::Lazy;
use regex::Regex;

/// The one key that bypasses key-name validation and is printed bare, with
/// no `key=` prefix — used for values that are themselves a complete,
/// pre-formatted line (e.g. an `NsHandle` string or a pid).
pub const RAW_KEY: &str = ".raw";

static VALID_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9][-A-Za-z0-9_.]*$").unwrap());

#[derive(Debug, Default, Clone)]
pub struct OutputMap {
    entries: Vec<(String, String)>,
}

impl OutputMap {
    pub fn new() -> Self {
        OutputMap::default()
    }

    /// Appends `(key, value)`. A key other than [`RAW_KEY`] that doesn't
    /// match `[A-Za-z0-9][-A-Za-z0-9_.]*` has its invalid characters
    /// replaced with `_`, with a warning logged.
    pub fn push(&mut self, key: &str, value: impl Into<String>) {
        let key = if key == RAW_KEY || VALID_KEY.is_match(key) {
            key.to_string()
        } else {
            let sanitized = sanitize_key(key);
            tracing::warn!("output key {key:?} is not valid, using {sanitized:?} instead");
            sanitized
        };
        self.entries.push((key, value.into()));
    }

    /// Convenience for the common case of a single raw line of output (an
    /// `NsHandle` string, a decimal pid).
    pub fn raw(value: impl Into<String>) -> Self {
        let mut map = OutputMap::new();
        map.push(RAW_KEY, value);
        map
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        for (key, value) in &self.entries {
            if key == RAW_KEY {
                writeln!(out, "{value}")?;
            } else {
                writeln!(out, "{key}={value}")?;
            }
        }
        Ok(())
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .enumerate()
        .map(|(i, c)| {
            let ok = if i == 0 {
                c.is_ascii_alphanumeric()
            } else {
                c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
            };
            if ok {
                c
            } else {
                '_'
            }
        })
        .collect()
}
