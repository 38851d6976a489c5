use std::sync::Arc;

use media_relay::config::{RelayConfig, RelayMode};
use media_relay::console;
use media_relay::pipeline::{
    Collector, DeliveryScheduler, IntakeListener, ReviewBoard, SourceCache,
};
use media_relay::settings::SettingsMirror;
use media_relay::store::{LibSqlBackend, Store};
use media_relay::transport::{TelegramTransport, Transport};
use media_relay::watermark::PassThrough;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = RelayConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export MEDIA_RELAY_BOT_TOKEN=123456:ABC-...");
        eprintln!("  export MEDIA_RELAY_TARGET=@your_channel");
        std::process::exit(1);
    });

    // Initialize tracing, optionally teeing into a log file.
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    let _log_guard = match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
            None
        }
    };

    eprintln!("📡 media-relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Target: {}", config.target_channel);
    eprintln!("   Database: {}", config.db_path.display());

    let store: Arc<dyn Store> = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);
    let settings = SettingsMirror::load(Arc::clone(&store)).await?;

    let transport: Arc<dyn Transport> = Arc::new(TelegramTransport::new(
        config.bot_token.clone(),
        config.target_channel.clone(),
    ));

    let scheduler = Arc::new(DeliveryScheduler::new(
        Arc::clone(&store),
        Arc::clone(&transport),
        Arc::clone(&settings),
        Arc::new(PassThrough),
        config.target_channel.clone(),
    ));

    match config.mode {
        RelayMode::Processor => {
            let seeded =
                console::ensure_elevated_reviewer(&*store, config.first_admin).await?;
            if !seeded {
                eprintln!("   Warning: no elevated reviewer; admin surface is read-only");
            }

            let review = Arc::new(ReviewBoard::new(
                Arc::clone(&store),
                Arc::clone(&transport),
                Arc::clone(&scheduler),
            ));
            let cache = SourceCache::new();
            let listener = IntakeListener::new(
                Arc::clone(&store),
                Arc::clone(&transport),
                Arc::clone(&settings),
                review,
                scheduler,
                cache,
            );

            eprintln!("   Mode: processor\n");
            listener.run().await?;
        }
        RelayMode::Collector => {
            let source = config
                .collect_source
                .expect("collector mode requires a source (validated at config load)");
            let collector = Collector::new(
                Arc::clone(&transport),
                Arc::clone(&settings),
                scheduler,
                source,
                config.collect_chance,
            );

            eprintln!("   Mode: collector (source {source})\n");
            collector.run().await?;
        }
    }

    Ok(())
}
