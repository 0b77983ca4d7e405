//! Subscriber setup from the `logging` config section.

use muse_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Filter directives: base level first, then per-crate overrides.
pub fn directives(config: Option<&LoggingConfig>, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        config
            .and_then(|c| c.level.as_deref())
            .filter(|l| !l.is_empty())
            .unwrap_or("info")
    };

    let mut parts = vec![level.to_string()];
    if let Some(config) = config {
        parts.extend(config.filters.iter().filter(|f| !f.is_empty()).cloned());
    }
    parts.join(",")
}

/// Install the global subscriber. `RUST_LOG` wins over the config file.
pub fn init(config: Option<&LoggingConfig>, verbose: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(config, verbose)));

    let to_stdout = config.is_some_and(|c| c.output == "stdout");
    let writer = if to_stdout {
        BoxMakeWriter::new(std::io::stdout)
    } else {
        BoxMakeWriter::new(std::io::stderr)
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    let result = if config.is_some_and(|c| c.format == "json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))
}
