pub mod console;
pub mod file;

use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    registry::LookupSpan,
    Layer,
};

use super::LogFormat;

/// Boxed-слой, общий для всех приёмников.
pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Собирает fmt-слой нужного формата поверх `writer`.
pub(crate) fn fmt_layer<S, W>(
    format: LogFormat,
    writer: W,
    with_ansi: bool,
) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(with_ansi)
        .with_target(true);

    match format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().with_current_span(true).boxed(),
    }
}
