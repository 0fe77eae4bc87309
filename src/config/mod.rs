//! Загрузка настроек: значения по умолчанию, TOML-файл и переменные
//! окружения `PUBCAST_*`.

pub mod settings;

pub use settings::{PublisherSettings, Settings, SubscriberSettings, CONFIG_PATH_ENV, ENV_PREFIX};
