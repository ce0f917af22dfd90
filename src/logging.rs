use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSection;

/// Filter used when `RUST_LOG` is unset: the configured level for our
/// crate and the HTTP stack, quieter for chatty dependencies.
fn default_directives(level: &str) -> String {
    format!("{level},ecosphere={level},tower_http={level},hyper=warn,reqwest=warn")
}

fn build_filter(config: &LoggingSection) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = config.level.trim();
    EnvFilter::try_new(default_directives(level))
        .with_context(|| format!("invalid logging.level: {}", level))
}

/// Install the global subscriber on stderr, leaving stdout to command
/// output. `RUST_LOG` overrides `logging.level`; `logging.json` switches to
/// one JSON object per line.
pub fn init_logging(config: &LoggingSection) -> Result<()> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}
