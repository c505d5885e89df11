//! Console log format for whlink.
//!
//! `[timestamp] [service] [level] message`, with the service column replaced
//! by `wh-<component>` when the event carries a `component` field. Session
//! state changes (`from`/`to` fields) and peer events (`aid`) get a fixed
//! suffix so they line up in the console.

use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

const SERVICE_NAME_WIDTH: usize = 16;
const LOG_LEVEL_WIDTH: usize = 7;

/// Log an info line tagged with a component
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

/// Log a warning tagged with a component
#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

/// Fixed-column formatter for whlink console output
pub struct WhLogFormatter {
    service_name: String,
    color_enabled: bool,
}

impl WhLogFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            color_enabled: is_terminal(),
        }
    }

    /// Disable ANSI colors regardless of the terminal
    pub fn without_color(mut self) -> Self {
        self.color_enabled = false;
        self
    }

    fn format_service_name(&self, component: Option<&str>) -> String {
        let name = match component {
            Some(comp) => format!("wh-{}", comp),
            None => self.service_name.clone(),
        };

        if name.chars().count() > SERVICE_NAME_WIDTH {
            let truncated: String = name.chars().take(SERVICE_NAME_WIDTH - 1).collect();
            format!("{}…", truncated)
        } else {
            format!("{:<width$}", name, width = SERVICE_NAME_WIDTH)
        }
    }

    fn format_log_level(&self, level: &Level) -> String {
        let level_str = match *level {
            Level::ERROR => "✗ ERROR",
            Level::WARN => "⚠ WARN",
            Level::INFO => "ℹ INFO",
            Level::DEBUG => "◦ DEBUG",
            Level::TRACE => "◦ TRACE",
        };

        // icons take two columns
        format!("{:<width$}", level_str, width = LOG_LEVEL_WIDTH + 2)
    }

    fn color_for_level(&self, level: &Level) -> &'static str {
        if !self.color_enabled {
            return "";
        }

        match *level {
            Level::ERROR => COLOR_BRIGHT_RED,
            Level::WARN => COLOR_BRIGHT_YELLOW,
            Level::INFO => COLOR_GREEN,
            Level::DEBUG | Level::TRACE => COLOR_BRIGHT_GRAY,
        }
    }

    fn write_line(
        &self,
        writer: &mut impl fmt::Write,
        timestamp: &str,
        level: &Level,
        visitor: &FieldVisitor,
    ) -> fmt::Result {
        let service = self.format_service_name(visitor.component.as_deref());
        let formatted_level = self.format_log_level(level);
        let color = self.color_for_level(level);
        let (reset, cyan) = if self.color_enabled {
            (COLOR_RESET, COLOR_CYAN)
        } else {
            ("", "")
        };

        write!(
            writer,
            "{}[{}] [{}] [{}{}{}] ",
            cyan, timestamp, service, color, formatted_level, reset
        )?;
        write!(writer, "{}", visitor.message)?;
        if let (Some(from), Some(to)) = (&visitor.from, &visitor.to) {
            write!(writer, " [{} -> {}]", from, to)?;
        }
        if let Some(aid) = visitor.aid {
            write!(writer, " (aid {})", aid)?;
        }
        writeln!(writer, "{}", reset)
    }
}

impl<S, N> FormatEvent<S, N> for WhLogFormatter
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
        let timestamp = chrono::Local::now()
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.write_line(&mut writer, &timestamp, event.metadata().level(), &visitor)
    }
}

/// Pulls the fields the console line shows out of an event
#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
    from: Option<String>,
    to: Option<String>,
    aid: Option<u64>,
}

fn unquote(raw: String) -> String {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        raw[1..raw.len() - 1].to_string()
    } else {
        raw
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        let value = unquote(format!("{:?}", value));
        match field.name() {
            "message" => self.message = value,
            "component" => self.component = Some(value),
            "from" => self.from = Some(value),
            "to" => self.to = Some(value),
            "aid" => self.aid = value.parse().ok(),
            _ => {}
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.record_debug(field, &value)
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        if field.name() == "aid" {
            self.aid = Some(value);
        } else {
            self.record_debug(field, &value)
        }
    }
}

fn is_terminal() -> bool {
    match std::env::var("TERM") {
        Ok(term) => term != "dumb",
        Err(_) => false,
    }
}
