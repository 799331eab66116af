use std::fmt::Display;
use std::time::Instant;

use console::Style;
use indicatif::ProgressStyle;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const ANSI_BLUE: Style = Style::new().blue();

/// Environment variable holding the log filter, e.g. `tsumiki=debug`.
pub const LOG_ENV: &str = "TSUMIKI_LOG";

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Install the global subscriber: log lines on stderr, interleaved with the
/// progress bars of running tasks.
pub fn init_logging() -> anyhow::Result<()> {
    let indicatif = IndicatifLayer::new();
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer()),
        )
        .with(indicatif)
        .try_init()?;

    Ok(())
}

/// Progress bar shown for the whole build.
pub(crate) fn get_style_build() -> Result<ProgressStyle, indicatif::style::TemplateError> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
        .progress_chars("=>-"))
}

/// Spinner shown for a single running task.
pub(crate) fn get_style_task() -> Result<ProgressStyle, indicatif::style::TemplateError> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.blue} {msg}")?)
}
