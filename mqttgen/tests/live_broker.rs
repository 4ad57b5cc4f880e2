//! End-to-end runs of the `mqttgen` binary against a broker on
//! localhost:1883. Run with `cargo test -- --ignored`.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;
use tokio::time::timeout;

fn write_config(name: &str, messages: Value) -> PathBuf {
    let config = json!({
        "misc": {"time_interval": 0.1, "logging_level": "info"},
        "mqtt": {"host": "localhost", "port": 1883, "qos": 1},
        "messages": messages
    });
    let path = std::env::temp_dir().join(format!("mqttgen-{}-{}.json", name, unique_suffix()));
    std::fs::write(&path, config.to_string()).unwrap();
    path
}

fn unique_suffix() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos()
}

fn spawn_generator(config: &PathBuf) -> Child {
    Command::new(env!("CARGO_BIN_EXE_mqttgen"))
        .arg(config)
        .spawn()
        .expect("failed to start mqttgen")
}

async fn observer(topics: &[&str]) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(format!("observer-{}", unique_suffix()), "localhost", 1883);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, eventloop) = AsyncClient::new(options, 100);
    for topic in topics {
        client.subscribe(*topic, QoS::AtLeastOnce).await.unwrap();
    }
    (client, eventloop)
}

async fn next_payload(eventloop: &mut EventLoop, topic: &str) -> String {
    loop {
        let event = timeout(Duration::from_secs(5), eventloop.poll())
            .await
            .expect("no message within 5s")
            .expect("MQTT error");
        if let Event::Incoming(Packet::Publish(publish)) = event {
            if publish.topic == topic {
                return String::from_utf8_lossy(&publish.payload).to_string();
            }
        }
    }
}

#[tokio::test]
#[ignore]
async fn test_generator_publishes_and_accepts_set() {
    let config = write_config(
        "set",
        json!({
            "temp": {
                "topic": "mqttgen-test/temp",
                "payload": {
                    "value": {
                        "func": "constant",
                        "param": {"cur": 20},
                        "set:mqttgen-test/temp/set": "cur"
                    }
                }
            }
        }),
    );
    let (client, mut eventloop) = observer(&["mqttgen-test/temp"]).await;
    let mut generator = spawn_generator(&config);

    let first: Value = serde_json::from_str(&next_payload(&mut eventloop, "mqttgen-test/temp").await).unwrap();
    assert_eq!(first, json!({"value": 20}));

    client
        .publish("mqttgen-test/temp/set", QoS::AtLeastOnce, false, "42")
        .await
        .unwrap();

    let mut updated = false;
    for _ in 0..20 {
        let payload = next_payload(&mut eventloop, "mqttgen-test/temp").await;
        if serde_json::from_str::<Value>(&payload).unwrap() == json!({"value": 42}) {
            updated = true;
            break;
        }
    }

    generator.kill().unwrap();
    let _ = std::fs::remove_file(&config);
    assert!(updated, "SET command was never applied");
}

#[tokio::test]
#[ignore]
async fn test_generator_answers_get() {
    let config = write_config(
        "get",
        json!({
            "quiet": {
                "topic": "mqttgen-test/quiet",
                "get": "mqttgen-test/quiet/get",
                "sync": false,
                "payload": "on demand"
            },
            "tick": {"topic": "mqttgen-test/tick", "payload": 1}
        }),
    );
    let (client, mut eventloop) = observer(&["mqttgen-test/quiet", "mqttgen-test/tick"]).await;
    let mut generator = spawn_generator(&config);

    // Wait until the generator is up before asking
    next_payload(&mut eventloop, "mqttgen-test/tick").await;
    client
        .publish("mqttgen-test/quiet/get", QoS::AtLeastOnce, false, "")
        .await
        .unwrap();

    let payload = next_payload(&mut eventloop, "mqttgen-test/quiet").await;

    generator.kill().unwrap();
    let _ = std::fs::remove_file(&config);
    assert_eq!(payload, "on demand");
}
