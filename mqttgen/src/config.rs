use crate::errors::{Error, Result};
use rumqttc::QoS;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub misc: MiscSettings,
    #[serde(default)]
    pub mqtt: MqttSettings,
    /// Classified later by `MessageSet::load`.
    pub messages: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MiscSettings {
    /// Seconds between two ticks.
    #[serde(default = "default_time_interval")]
    pub time_interval: f64,
    #[serde(default = "default_logging_level")]
    pub logging_level: String,
    #[serde(default)]
    pub logging_file: Option<String>,
}

impl Default for MiscSettings {
    fn default() -> Self {
        Self {
            time_interval: default_time_interval(),
            logging_level: default_logging_level(),
            logging_file: None,
        }
    }
}

impl MiscSettings {
    pub fn interval(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.time_interval).map_err(|_| {
            Error::Config(format!("invalid time_interval {}", self.time_interval))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default, rename = "willTopic")]
    pub will_topic: String,
    #[serde(default, rename = "willMessage")]
    pub will_message: String,
    #[serde(default, rename = "willQoS")]
    pub will_qos: u8,
    #[serde(default, rename = "willRetain")]
    pub will_retain: bool,
    /// Publication QoS.
    #[serde(default = "default_qos")]
    pub qos: u8,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            keepalive: default_keepalive(),
            client_id: None,
            will_topic: String::new(),
            will_message: String::new(),
            will_qos: 0,
            will_retain: false,
            qos: default_qos(),
        }
    }
}

impl MqttSettings {
    pub fn publish_qos(&self) -> Result<QoS> {
        qos_from_level(self.qos)
    }

    /// Will message, when one is configured.
    pub fn will(&self) -> Result<Option<(String, String, QoS, bool)>> {
        if self.will_message.is_empty() {
            return Ok(None);
        }
        Ok(Some((
            self.will_topic.clone(),
            self.will_message.clone(),
            qos_from_level(self.will_qos)?,
            self.will_retain,
        )))
    }
}

fn default_time_interval() -> f64 {
    1.0
}
fn default_logging_level() -> String {
    "info".to_string()
}
fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    1883
}
fn default_keepalive() -> u64 {
    60
}
fn default_qos() -> u8 {
    1
}

pub fn qos_from_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(Error::Config(format!("invalid QoS {}", other))),
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text).map_err(|e| match e {
            Error::Json(source) => Error::ConfigParse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.misc.interval()?;
        self.mqtt.publish_qos()?;
        self.mqtt.will()?;
        Ok(())
    }
}
