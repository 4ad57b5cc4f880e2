mod errors;
mod flow;
mod player;

use anyhow::{anyhow, Context};
use clap::Parser;
use flow::Flow;
use player::{MqttPublisher, Player};
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "mqttplay", version, about = "Replay a recorded MQTT flow")]
struct Args {
    /// Flow file, one `<time> <topic> <payload>` row per line
    file: PathBuf,

    /// Column separator
    #[arg(long, default_value = " ")]
    delimiter: String,

    /// Publish as fast as possible instead of following the recorded timing
    #[arg(long)]
    no_pacing: bool,

    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    host: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Publication QoS
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=2))]
    qos: u8,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    if let Err(e) = run(args).await {
        println!("{:#}", e);
        std::process::exit(1);
    }

    println!("Replay ended");
}

async fn run(args: Args) -> anyhow::Result<()> {
    let flow = Flow::read(&args.file, &args.delimiter)?;
    info!("Loaded {} rows from {}", flow.len(), args.file.display());

    let qos = match args.qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    };

    let client_id = format!("mqttplay-{}", uuid::Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(client_id, &args.host, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 1000);
    let (connected_tx, connected_rx) = oneshot::channel();

    // Spawn eventloop handler
    let eventloop_handle = tokio::spawn(async move {
        let mut connected_tx = Some(connected_tx);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    if let Some(tx) = connected_tx.take() {
                        let _ = tx.send(());
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT eventloop error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    tokio::time::timeout(CONNECT_TIMEOUT, connected_rx)
        .await
        .map_err(|_| anyhow!("Timed out connecting to {}:{}", args.host, args.port))?
        .context("MQTT eventloop stopped before connecting")?;
    info!("Connected to MQTT broker {}:{}", args.host, args.port);

    let mut player = Player::new(MqttPublisher { client, qos }, !args.no_pacing);
    let count = player
        .play(&flow, &mut std::io::stdout())
        .await
        .context("Replay interrupted")?;
    info!("Published {} messages", count);

    let publisher = player.into_publisher();
    publisher.client.disconnect().await?;
    if tokio::time::timeout(FLUSH_TIMEOUT, eventloop_handle).await.is_err() {
        error!("Pending publishes not flushed within {:?}", FLUSH_TIMEOUT);
    }

    Ok(())
}
