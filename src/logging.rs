//! Diagnostics go to stderr through `tracing`; stdout is reserved for report
//! lines so it stays machine-parsable.

use anyhow::{anyhow, Result};
use colored::*;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// Event formatter that colors the whole line by level.
///
/// Warnings and errors carry a level tag so they are still recognisable when
/// stderr is redirected to a file and colors are dropped.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Buffer the fields so color applies to the entire line.
        let mut buffer = String::new();
        ctx.format_fields(Writer::new(&mut buffer), event)?;

        let level = *event.metadata().level();
        let line = match level_tag(level) {
            Some(tag) => format!("{tag} {buffer}"),
            None => buffer,
        };

        let colored_output = match level {
            Level::INFO => line.white(),
            Level::WARN => line.yellow(),
            Level::ERROR => line.red(),
            Level::DEBUG => line.blue(),
            Level::TRACE => line.purple(),
        };
        writeln!(writer, "{}", colored_output)
    }
}

fn level_tag(level: Level) -> Option<&'static str> {
    match level {
        Level::ERROR => Some("error:"),
        Level::WARN => Some("warning:"),
        _ => None,
    }
}

/// Default level for a `-v` count; `RUST_LOG` overrides it
pub fn default_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Install the global subscriber writing to stderr
pub fn init(verbose: u8) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(default_level(verbose).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .event_format(ColorizedFormatter)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level() {
        assert_eq!(default_level(0), LevelFilter::INFO);
        assert_eq!(default_level(1), LevelFilter::DEBUG);
        assert_eq!(default_level(5), LevelFilter::TRACE);
    }

    #[test]
    fn test_level_tags() {
        assert_eq!(level_tag(Level::ERROR), Some("error:"));
        assert_eq!(level_tag(Level::WARN), Some("warning:"));
        assert_eq!(level_tag(Level::INFO), None);
    }
}
