//==============================================================================
// Logging setup for the demo driver
//==============================================================================

use colored::*;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{self, Writer};
use tracing_subscriber::fmt::{FmtContext, FormatEvent};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Compact event format: a coloured level marker, the thread name, then the
/// event fields.
pub struct DemoFormatter;

impl<S, N> FormatEvent<S, N> for DemoFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> format::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let (symbol, paint): (&str, fn(ColoredString) -> ColoredString) =
            match *event.metadata().level() {
                Level::TRACE => ("[ ]", |s| s.dimmed()),
                Level::DEBUG => ("[?]", |s| s.blue()),
                Level::INFO => ("[+]", |s| s.green().bold()),
                Level::WARN => ("[*]", |s| s.yellow().bold()),
                Level::ERROR => ("[-]", |s| s.red().bold()),
            };

        write!(writer, "{} ", paint(symbol.into()))?;

        let current = std::thread::current();
        if let Some(name) = current.name() {
            write!(writer, "{} ", name.dimmed())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `level` when set.
///
/// Returns `false` if a subscriber was already installed; the existing one is
/// kept.
pub fn init(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .event_format(DemoFormatter)
        .try_init()
        .is_ok()
}
