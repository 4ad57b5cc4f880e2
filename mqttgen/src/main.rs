mod config;
mod errors;
mod eval;
mod functions;
mod metrics;
mod model;
mod mqtt;
mod router;
mod scheduler;
mod template;

use axum::{routing::get, Router as HttpRouter};
use clap::Parser;
use config::Config;
use eval::{Evaluator, SystemClock};
use mqtt::MqttBroker;
use rand::rngs::StdRng;
use rand::SeedableRng;
use router::Router;
use scheduler::Scheduler;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use template::MessageSet;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mqttgen", version, about = "Synthetic MQTT traffic generator")]
struct Cli {
    /// JSON configuration file
    config: PathBuf,

    /// Broker host, overrides mqtt.host
    #[arg(long, env = "MQTT_BROKER")]
    host: Option<String>,

    /// Broker port, overrides mqtt.port
    #[arg(long, env = "MQTT_PORT")]
    port: Option<u16>,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    if let Some(host) = cli.host {
        config.mqtt.host = host;
    }
    if let Some(port) = cli.port {
        config.mqtt.port = port;
    }

    if let Err(e) = init_logging(&config) {
        eprintln!("Failed to set up logging: {}", e);
        std::process::exit(1);
    }

    info!("Starting mqttgen with {}", cli.config.display());

    let set = match MessageSet::load(std::mem::take(&mut config.messages)) {
        Ok(set) => set,
        Err(e) => fail(e),
    };
    let router = match Router::discover(&set) {
        Ok(router) => router,
        Err(e) => fail(e),
    };
    info!(
        "Loaded {} messages, {} command topics",
        set.len(),
        router.len()
    );

    let (interval, qos) = match (config.misc.interval(), config.mqtt.publish_qos()) {
        (Ok(interval), Ok(qos)) => (interval, qos),
        (Err(e), _) | (_, Err(e)) => fail(e),
    };

    if let Some(addr) = cli.metrics_addr {
        spawn_metrics_server(addr).await;
    }

    let broker = match MqttBroker::connect(&config.mqtt).await {
        Ok(broker) => broker,
        Err(e) => fail(e),
    };

    let evaluator = Evaluator::new(StdRng::from_entropy(), SystemClock);
    let mut scheduler = match Scheduler::start(broker, set, router, evaluator, qos).await {
        Ok(scheduler) => scheduler,
        Err(e) => fail(e),
    };

    tokio::select! {
        _ = scheduler.run(interval) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    scheduler.shutdown().await;
    info!("Shutting down");
}

/// Log, and print for the operator: logs may go to a file or be filtered out.
fn fail(e: errors::Error) -> ! {
    error!("{}", e);
    eprintln!("{}", e);
    std::process::exit(1);
}

/// `RUST_LOG` wins over `misc.logging_level`.
fn init_logging(config: &Config) -> errors::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.misc.logging_level))
        .map_err(|e| errors::Error::Config(format!("invalid logging_level: {}", e)))?;

    match config.misc.logging_file.as_deref().filter(|f| !f.is_empty()) {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

async fn spawn_metrics_server(addr: String) {
    if let Err(e) = metrics::init_metrics() {
        error!("Failed to register metrics: {}", e);
        return;
    }

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!("Metrics server listening on {}", addr);

    let app = HttpRouter::new().route("/metrics", get(metrics_handler));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("Metrics server error: {}", e);
        });
    });
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
