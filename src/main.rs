use anyhow::Context;
use clap::Parser;
use mail_producer::{Messaging, MessagingConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "mail-producer")]
#[command(about = "Kafka producer lifecycle for send-mail notifications", long_about = None)]
struct Args {
    /// TOML settings file; without it everything comes from the environment
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting mail-producer");

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            MessagingConfig::from_file(path)
                .with_context(|| format!("failed to load configuration from {:?}", path))?
        }
        None => {
            let config = MessagingConfig::from_env();
            config.validate().context("invalid configuration")?;
            config
        }
    };

    info!(
        kafka_brokers = ?config.broker.brokers,
        client_id = %config.broker.client_id,
        topic = %config.topic.name,
        connect_timeout_secs = config.connect_timeout_secs,
        "Configuration summary"
    );

    let messaging = Arc::new(Messaging::kafka(config));
    let startup = messaging.start();

    // Messaging comes up in the background; the host never waits on it.
    info!("Service ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    if let Some(startup) = startup {
        startup.abort();
    }
    messaging.shutdown().await;

    info!("mail-producer stopped");
    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("mail_producer=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("mail_producer=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
