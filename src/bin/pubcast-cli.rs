//! CLI pubcast
//!
//! Публикует события с необязательным bulk-компаньоном и слушает топики
//! публикатора.

use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pubcast::{
    callback, init_logging,
    protocol::{BULK_FIELD, ID_FIELD, NAME_FIELD},
    Event, Payload, Publisher, Settings, Subscriber, SubscriberConfig,
};
use serde_json::Value;
use tracing::{debug, info};

/// Аргументы командной строки
#[derive(Parser)]
#[command(name = "pubcast-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Broadcast events to subscribers and listen to them", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Путь к файлу настроек
    #[arg(short, long, env = "PUBCAST_CONFIG", help = "Путь к TOML-файлу настроек")]
    config: Option<PathBuf>,
    /// Включить подробный вывод (debug)
    #[arg(short, long, help = "Включить подробный вывод для отладки")]
    verbose: bool,
    /// Подавить большинство логов (только warn/error)
    #[arg(short = 'q', long, help = "Подавить логирование (только warn/error)")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

/// Подкоманды CLI
#[derive(Subcommand)]
enum Commands {
    /// Опубликовать событие
    #[command(alias = "pub")]
    Publish {
        /// Имя события (топик)
        #[arg(short, long)]
        name: String,
        /// Поле события `key=value`; значение разбирается как JSON, иначе
        /// считается строкой
        #[arg(short, long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
        /// Файл, содержимое которого уходит bulk-фреймом
        #[arg(short, long)]
        bulk_file: Option<PathBuf>,
        /// Порт публикатора (по умолчанию из настроек)
        #[arg(short, long)]
        port: Option<u16>,
        /// Сколько раз опубликовать
        #[arg(long, default_value_t = 1)]
        count: u64,
        /// Пауза между публикациями, мс
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        /// Пауза перед первой публикацией, чтобы подписчики успели
        /// подключиться, мс
        #[arg(long, default_value_t = 500)]
        delay_ms: u64,
    },
    /// Слушать топики и печатать сообщения до Ctrl-C
    #[command(alias = "sub")]
    Listen {
        /// Топик; без флага слушаются все топики
        #[arg(short, long = "topic")]
        topics: Vec<String>,
        /// Адрес публикатора (по умолчанию из настроек)
        #[arg(short, long)]
        address: Option<String>,
        /// Порт публикатора (по умолчанию из настроек)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(cli.config.as_deref())?;
    if cli.verbose {
        settings.logging.level = "debug".to_string();
    } else if cli.quiet {
        settings.logging.level = "warn".to_string();
    }

    let logging = init_logging(settings.logging.clone())
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let result = match cli.command {
        Commands::Publish {
            name,
            fields,
            bulk_file,
            port,
            count,
            interval_ms,
            delay_ms,
        } => {
            let options = PublishOptions {
                name,
                fields,
                bulk_file,
                port: port.unwrap_or(settings.publisher.port),
                count,
                interval: Duration::from_millis(interval_ms),
                delay: Duration::from_millis(delay_ms),
            };
            run_publish(&settings, options).await
        }
        Commands::Listen {
            topics,
            address,
            port,
        } => {
            let address = address.unwrap_or_else(|| settings.subscriber.address.clone());
            let port = port.unwrap_or(settings.subscriber.port);
            run_listen(settings.subscriber.subscriber_config(), topics, &address, port).await
        }
    };

    logging.shutdown();
    result
}

struct PublishOptions {
    name: String,
    fields: Vec<String>,
    bulk_file: Option<PathBuf>,
    port: u16,
    count: u64,
    interval: Duration,
    delay: Duration,
}

async fn run_publish(
    settings: &Settings,
    options: PublishOptions,
) -> Result<()> {
    let mut template = Event::new(options.name.as_str());
    for field in &options.fields {
        let (key, value) = parse_field(field)?;
        template.insert(key, value);
    }

    let bulk = match &options.bulk_file {
        Some(path) => Some(
            tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read bulk file {}", path.display()))?,
        ),
        None => None,
    };

    let publisher = Publisher::bind(options.port, settings.publisher.transport_config())
        .await
        .with_context(|| format!("failed to bind port {}", options.port))?;
    info!(port = options.port, "publisher ready");

    tokio::time::sleep(options.delay).await;

    for i in 0..options.count {
        if i > 0 {
            tokio::time::sleep(options.interval).await;
        }

        let mut event = template.clone();
        let id = publisher.publish(&mut event, bulk.as_deref()).await?;
        println!("published #{id}: {event}");
    }

    // Даём очередям подписчиков уйти в сокеты до закрытия.
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}

async fn run_listen(
    config: SubscriberConfig,
    topics: Vec<String>,
    address: &str,
    port: u16,
) -> Result<()> {
    let subscriber = Subscriber::connect(Some(address), Some(port), config).await?;
    info!(endpoint = %subscriber.endpoint(), "listening");

    let printer = callback(|message| {
        match &message.payload {
            Payload::Event(event) => println!("{} {}", message.topic, event),
            Payload::Bulk(bulk) => println!(
                "{} <{} bytes, pub_id {}>",
                message.topic,
                bulk.data.len(),
                bulk.pub_id
            ),
        }
        Ok(())
    });

    if topics.is_empty() {
        subscriber.register(&printer, None).await?;
    } else {
        for topic in &topics {
            subscriber.register(&printer, Some(topic)).await?;
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    debug!("shutting down");
    subscriber.shutdown().await;
    drop(printer);
    Ok(())
}

/// Поля, которые заполняет сам публикатор (`name` берётся из `--name`).
const RESERVED_FIELDS: [&str; 3] = [NAME_FIELD, ID_FIELD, BULK_FIELD];

/// Разбирает `key=value`. Значение, которое не является JSON, берётся
/// строкой.
fn parse_field(field: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = field.split_once('=') else {
        bail!("field '{field}' must look like key=value");
    };
    if key.is_empty() {
        bail!("field '{field}' has an empty key");
    }
    if RESERVED_FIELDS.contains(&key) {
        bail!("field '{key}' is set by the publisher and cannot be passed with --field");
    }

    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}
