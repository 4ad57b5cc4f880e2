use crate::config::MqttSettings;
use crate::errors::{Error, Result};
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

const CHANNEL_CAPACITY: usize = 1000;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Network servicing stops once the event loop has been quiet this long.
const IDLE_WINDOW: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Message(InboundMessage),
    /// The client reconnected with a clean session; subscriptions are gone.
    Reconnected,
}

/// What the scheduler needs from a broker connection.
pub trait Broker {
    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<()>;

    async fn publish(&mut self, topic: &str, payload: String, qos: QoS, retain: bool) -> Result<()>;

    /// Service network I/O and return the next inbound event, or `None`
    /// once nothing more is pending.
    async fn next_event(&mut self) -> Result<Option<BrokerEvent>>;

    async fn disconnect(&mut self) -> Result<()>;
}

pub struct MqttBroker {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttBroker {
    /// Connect and wait for the broker's CONNACK.
    pub async fn connect(settings: &MqttSettings) -> Result<Self> {
        let client_id = settings
            .client_id
            .clone()
            .unwrap_or_else(|| format!("mqttgen-{}", uuid::Uuid::new_v4()));

        info!(
            "Connecting to MQTT broker at {}:{} as {}, keepalive={}s",
            settings.host, settings.port, client_id, settings.keepalive
        );

        let mut mqtt_options = MqttOptions::new(client_id, &settings.host, settings.port);
        mqtt_options.set_keep_alive(Duration::from_secs(settings.keepalive));
        mqtt_options.set_clean_session(true);

        if let Some(username) = settings.username.as_deref().filter(|u| !u.is_empty()) {
            info!("Setting credentials for user {}", username);
            mqtt_options.set_credentials(username, settings.password.clone().unwrap_or_default());
        }

        if let Some((topic, message, qos, retain)) = settings.will()? {
            info!(
                "Setting will message: topic={}, payload={}, qos={:?}, retain={}",
                topic, message, qos, retain
            );
            mqtt_options.set_last_will(LastWill::new(topic, message, qos, retain));
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, CHANNEL_CAPACITY);

        let address = format!("{}:{}", settings.host, settings.port);
        loop {
            match timeout(CONNECT_TIMEOUT, eventloop.poll()).await {
                Ok(Ok(Event::Incoming(Packet::ConnAck(connack)))) => {
                    debug!("Received {:?}", connack);
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(Error::Connection(e)),
                Err(_) => return Err(Error::ConnectTimeout(address)),
            }
        }

        info!("Connected to MQTT broker {}", address);
        Ok(Self { client, eventloop })
    }
}

impl Broker for MqttBroker {
    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<()> {
        self.client.subscribe(topic, qos).await?;
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: String, qos: QoS, retain: bool) -> Result<()> {
        self.client.publish(topic, qos, retain, payload).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<BrokerEvent>> {
        loop {
            match timeout(IDLE_WINDOW, self.eventloop.poll()).await {
                Err(_) => return Ok(None),
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    return Ok(Some(BrokerEvent::Message(InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    })));
                }
                // The first CONNACK is consumed by `connect`
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                    info!("Reconnected to MQTT broker");
                    return Ok(Some(BrokerEvent::Reconnected));
                }
                Ok(Ok(_)) => {}
                // rumqttc reconnects on the next poll
                Ok(Err(e)) => return Err(Error::Connection(e)),
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.client.disconnect().await?;
        // Let the event loop flush pending publishes and the DISCONNECT packet
        while let Ok(Ok(event)) = timeout(IDLE_WINDOW, self.eventloop.poll()).await {
            if let Event::Outgoing(rumqttc::Outgoing::Disconnect) = event {
                break;
            }
        }
        info!("Disconnected from MQTT broker");
        Ok(())
    }
}
