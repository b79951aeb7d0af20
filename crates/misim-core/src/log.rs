//! Logging facilities.
//!
//! Log lines share one shape: a fixed-width virtual timestamp, a
//! colored level tag and the emitting component, e.g.
//! `[    1.500] [INFO ] frontend: ...`. A single parameterized macro
//! produces all levels; the per-level macros are thin aliases over it.

use atty::Stream;
use colored::{Color, ColoredString, Colorize};
use log::{error, Level};
use serde_json::json;
use serde_type_name::type_name;

use crate::component::Id;
use crate::event::{Event, EventData};

/// The colored, fixed-width tag of a log level. Coloring is dropped
/// when stderr is not a console.
pub fn level_tag(level: Level) -> ColoredString {
    let (tag, color) = match level {
        Level::Error => ("ERROR", Color::Red),
        Level::Warn => ("WARN ", Color::Yellow),
        Level::Info => ("INFO ", Color::Green),
        Level::Debug => ("DEBUG", Color::Blue),
        Level::Trace => ("TRACE", Color::Cyan),
    };
    if atty::is(Stream::Stderr) {
        tag.color(color)
    } else {
        tag.normal()
    }
}

/// Logs a message at the given level, stamped with the current virtual
/// time and the name of the component owning `$ctx`.
#[macro_export]
macro_rules! sim_log {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {
        log::log!(
            target: $ctx.name(),
            $level,
            "[{:9.3}] [{}] {}: {}",
            $ctx.time(),
            $crate::log::level_tag($level),
            $ctx.name(),
            format_args!($($arg)+)
        )
    };
}

/// Logs a message at the error level; see [`sim_log!`](crate::sim_log!).
#[macro_export]
macro_rules! log_error {
    ($ctx:expr, $($arg:tt)+) => ($crate::sim_log!(log::Level::Error, $ctx, $($arg)+));
}

/// Logs a message at the warn level; see [`sim_log!`](crate::sim_log!).
#[macro_export]
macro_rules! log_warn {
    ($ctx:expr, $($arg:tt)+) => ($crate::sim_log!(log::Level::Warn, $ctx, $($arg)+));
}

/// Logs a message at the info level; see [`sim_log!`](crate::sim_log!).
#[macro_export]
macro_rules! log_info {
    ($ctx:expr, $($arg:tt)+) => ($crate::sim_log!(log::Level::Info, $ctx, $($arg)+));
}

/// Logs a message at the debug level; see [`sim_log!`](crate::sim_log!).
#[macro_export]
macro_rules! log_debug {
    ($ctx:expr, $($arg:tt)+) => ($crate::sim_log!(log::Level::Debug, $ctx, $($arg)+));
}

/// Logs a message at the trace level; see [`sim_log!`](crate::sim_log!).
#[macro_export]
macro_rules! log_trace {
    ($ctx:expr, $($arg:tt)+) => ($crate::sim_log!(log::Level::Trace, $ctx, $($arg)+));
}

/// Logs an event whose payload matched no arm of a
/// [`dispatch!`](crate::dispatch!) match.
pub fn log_unmatched_event(time: f64, src: Id, dst: Id, data: Box<dyn EventData>) {
    error!(
        target: "simulation",
        "[{:9.3}] [{}] simulation: no dispatch arm for event {}",
        time,
        level_tag(Level::Error),
        json!({"type": type_name(&data).unwrap(), "payload": data, "src": src, "dst": dst})
    );
}

/// Logs an event destined to a component without a registered handler.
pub(crate) fn log_undelivered_event(event: &Event) {
    error!(
        target: "simulation",
        "[{:9.3}] [{}] simulation: no handler for event {}",
        event.time,
        level_tag(Level::Error),
        json!({"type": type_name(&event.data).unwrap(), "payload": event.data, "src": event.src, "dst": event.dst})
    );
}
