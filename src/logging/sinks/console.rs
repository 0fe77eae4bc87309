use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;

use super::{fmt_layer, BoxedLayer};
use crate::logging::config::ConsoleConfig;

/// Консольный слой (stdout).
pub fn layer<S>(config: &ConsoleConfig) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt_layer(config.format, std::io::stdout, config.with_ansi)
}
