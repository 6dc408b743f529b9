//! Structured logging: an `EnvFilter`-driven level, optional JSON
//! formatting, and an optional `tracing-journald` sink. On top of that this
//! crate adds a compatibility
//! layer emitting the legacy `"[<tag> <LEVEL> <file>:<line>] <message>"`
//! wire format for anything still scraping stderr text, gated by a
//! process-wide active-silencer counter.

use std::borrow::Cow;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use tracing::Level;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

const LOG_FORMAT_TEXT: &str = "text";
const LOG_FORMAT_JSON: &str = "json";
const LOG_FORMAT_LEGACY: &str = "legacy";

enum LogFormat {
    Text,
    Json,
    Legacy,
}

#[cfg(debug_assertions)]
const DEFAULT_LOG_LEVEL: &str = "debug";
#[cfg(not(debug_assertions))]
const DEFAULT_LOG_LEVEL: &str = "warn";

/// Guards the legacy text formatter: `silence()`/`unsilence()` bump/drop
/// this counter, and the formatter emits nothing while it is nonzero.
/// Mirrors the source's `log_silencer_count_mutex_` — a process-wide,
/// read-mostly counter that is deliberately never torn down.
static SILENCER_COUNT: Lazy<AtomicUsize> = Lazy::new(|| AtomicUsize::new(0));

pub fn silence() {
    SILENCER_COUNT.fetch_add(1, Ordering::SeqCst);
}

pub fn unsilence() {
    SILENCER_COUNT.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
        Some(n.saturating_sub(1))
    })
    .ok();
}

fn is_silenced() -> bool {
    SILENCER_COUNT.load(Ordering::SeqCst) > 0
}

struct LegacyFormatter {
    tag: &'static str,
}

impl<S, N> FormatEvent<S, N> for LegacyFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        if is_silenced() {
            return Ok(());
        }
        let meta = event.metadata();
        write!(
            writer,
            "[{} {} {}:{}] ",
            self.tag,
            meta.level(),
            meta.file().unwrap_or("?"),
            meta.line().unwrap_or(0),
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn detect_log_format(input: Option<&str>) -> Result<LogFormat> {
    match input {
        None | Some(LOG_FORMAT_TEXT) => Ok(LogFormat::Text),
        Some(LOG_FORMAT_JSON) => Ok(LogFormat::Json),
        Some(LOG_FORMAT_LEGACY) => Ok(LogFormat::Legacy),
        Some(unknown) => bail!("unknown log format: {unknown}"),
    }
}

fn detect_log_level(input: Option<String>, is_debug: bool) -> Result<Level> {
    let level: Cow<str> = match input {
        None if is_debug => "debug".into(),
        None => DEFAULT_LOG_LEVEL.into(),
        Some(level) => level.into(),
    };
    Ok(Level::from_str(level.as_ref())?)
}

#[derive(Debug, Default)]
pub struct ObservabilityConfig {
    pub log_debug_flag: bool,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
    pub log_format: Option<String>,
    pub journald: bool,
}

pub fn init(config: ObservabilityConfig) -> Result<()> {
    let level = detect_log_level(config.log_level, config.log_debug_flag)
        .context("failed to parse log level")?;
    let filter = tracing_subscriber::filter::LevelFilter::from(level);
    let format = detect_log_format(config.log_format.as_deref())
        .context("failed to detect log format")?;

    let journald = if config.journald {
        match tracing_journald::layer() {
            Ok(layer) => Some(layer.with_syslog_identifier("nscon".to_string())),
            Err(err) => {
                eprintln!("failed to initialize syslog logging: {err:?}");
                None
            }
        }
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(journald);

    match (config.log_file.as_ref(), format) {
        (None, LogFormat::Text) => subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .without_time()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        (None, LogFormat::Json) => subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        (None, LogFormat::Legacy) => subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(LegacyFormatter { tag: "nscon" })
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        (Some(path), format) => {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(path)
                .context("failed to open log file")?;
            match format {
                LogFormat::Json => subscriber
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .flatten_event(true)
                            .with_span_list(false)
                            .with_writer(file),
                    )
                    .try_init(),
                LogFormat::Legacy => subscriber
                    .with(
                        tracing_subscriber::fmt::layer()
                            .event_format(LegacyFormatter { tag: "nscon" })
                            .with_writer(file),
                    )
                    .try_init(),
                LogFormat::Text => subscriber
                    .with(tracing_subscriber::fmt::layer().with_writer(file))
                    .try_init(),
            }
        }
    }
    .map_err(|e| anyhow::anyhow!("failed to init logger: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_log_level_parses_all_named_levels() {
        let cases = [
            ("error", Level::ERROR),
            ("warn", Level::WARN),
            ("info", Level::INFO),
            ("debug", Level::DEBUG),
            ("trace", Level::TRACE),
        ];
        for (input, expected) in cases {
            assert_eq!(
                detect_log_level(Some(input.to_string()), false).unwrap(),
                expected
            );
        }
        assert_eq!(detect_log_level(None, true).unwrap(), Level::DEBUG);
        assert!(detect_log_level(Some("bogus".to_string()), false).is_err());
    }

    #[test]
    fn detect_log_format_rejects_unknown() {
        assert!(detect_log_format(Some("xml")).is_err());
        assert!(matches!(
            detect_log_format(Some("legacy")).unwrap(),
            LogFormat::Legacy
        ));
    }

    #[test]
    #[serial_test::serial]
    fn silencer_gates_legacy_formatter() {
        assert!(!is_silenced());
        silence();
        assert!(is_silenced());
        silence();
        unsilence();
        assert!(is_silenced());
        unsilence();
        assert!(!is_silenced());
    }
}
