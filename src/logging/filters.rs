use tracing_subscriber::EnvFilter;

use super::LoggingConfig;

/// Фильтр уровней. `RUST_LOG`, если задана, важнее конфигурации.
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directive = config.filter_directive();
            EnvFilter::try_new(&directive).unwrap_or_else(|e| {
                eprintln!("invalid log filter directive '{directive}': {e}; falling back to 'info'");
                EnvFilter::new("info")
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        env,
        sync::{Arc, Mutex},
    };

    use serial_test::serial;
    use tracing_subscriber::{fmt, prelude::*, registry::Registry};

    use super::*;

    struct VecMakeWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> fmt::MakeWriter<'a> for VecMakeWriter {
        type Writer = VecWriter;

        fn make_writer(&'a self) -> Self::Writer {
            VecWriter(self.0.clone())
        }
    }

    struct VecWriter(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for VecWriter {
        fn write(
            &mut self,
            buf: &[u8],
        ) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Тест проверяет, что уровень из конфигурации отсекает сообщения ниже.
    #[test]
    #[serial]
    fn test_filter_from_config_levels() {
        env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "warn".into(),
            ..Default::default()
        };

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let layer = fmt::layer()
            .with_writer(VecMakeWriter(buffer.clone()))
            .with_filter(build_filter(&config));
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("filtered info");
            tracing::warn!("visible warn");
        });

        let out = String::from_utf8_lossy(&buffer.lock().unwrap()).into_owned();
        assert!(out.contains("visible warn"));
        assert!(!out.contains("filtered info"));
    }

    /// Тест проверяет откат на `info` при некорректной директиве.
    #[test]
    #[serial]
    fn test_invalid_directive_falls_back() {
        env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "info".into(),
            directives: vec!["pubcast=loud".into()],
            ..Default::default()
        };
        let filter = build_filter(&config);
        assert_eq!(filter.to_string(), "info");
    }
}
