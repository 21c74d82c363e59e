//! Compact formatting helpers for log output.

use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::clock::duration_ns;
use crate::types::TimeNs;

static LOG_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds since the first log line of this process.
pub fn log_clock() -> TimeNs {
    duration_ns(LOG_EPOCH.get_or_init(Instant::now).elapsed())
}

/// Timestamp formatter with underscore-grouped digits, tagged with the
/// execution context that produced the line.
///
/// Formats nanosecond timestamps with room for 12 digits (up to ~15
/// seconds), grouped in 3s with underscores, right-aligned:
/// - `[   988_779_026 k0-P1]`: kernel context 0 of process 1
/// - `[   988_779_026 main]`
pub struct FmtTs<'a> {
    pub ns: TimeNs,
    pub context: &'a str,
}

impl<'a> FmtTs<'a> {
    pub fn new(ns: TimeNs, context: &'a str) -> Self {
        Self { ns, context }
    }
}

/// Format a u64 with underscore grouping (groups of 3 from the right).
pub fn fmt_grouped(v: u64) -> String {
    let digits = v.to_string();
    let len = digits.len();
    if len <= 3 {
        return digits;
    }
    let mut result = String::with_capacity(len + (len - 1) / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            result.push('_');
        }
        result.push(ch);
    }
    result
}

impl fmt::Display for FmtTs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>15} {}", fmt_grouped(self.ns), self.context)
    }
}

/// Event formatter showing process-relative time and the OS thread name
/// instead of wall-clock time, in plain colored text.
pub struct SimFormat;

impl<S, N> FormatEvent<S, N> for SimFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let current = std::thread::current();
        let context = current.name().unwrap_or("?");
        write!(writer, "[{}] ", FmtTs::new(log_clock(), context))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::ERROR => "\x1b[31m", // red
                Level::WARN => "\x1b[33m",  // yellow
                Level::INFO => "\x1b[32m",  // green
                Level::DEBUG => "\x1b[34m", // blue
                Level::TRACE => "\x1b[35m", // magenta
            };
            write!(writer, "{color}{level:>5}\x1b[0m ")?;
        } else {
            write!(writer, "{level:>5} ")?;
        }

        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        write!(writer, "{}", visitor.message)?;
        for (key, value) in &visitor.fields {
            write!(writer, " {key}={value}")?;
        }

        writeln!(writer)
    }
}

/// Collects the message and key-value fields of an event.
#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: Vec<(String, String)>,
}

impl FieldCollector {
    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, value.to_string());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, format!("{value:.3}"));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, value.to_string());
    }
}
