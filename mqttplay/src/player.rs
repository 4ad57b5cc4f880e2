use crate::errors::Result;
use crate::flow::Flow;
use rumqttc::{AsyncClient, QoS};
use std::io::Write;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Where replayed rows go.
pub trait Publisher {
    async fn publish(&mut self, topic: &str, payload: &str) -> Result<()>;
}

pub struct MqttPublisher {
    pub client: AsyncClient,
    pub qos: QoS,
}

impl Publisher for MqttPublisher {
    async fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        // Recorded flows never carry retained messages
        self.client
            .publish(topic, self.qos, false, payload.as_bytes().to_vec())
            .await?;
        Ok(())
    }
}

pub struct Player<P> {
    publisher: P,
    pacing: bool,
}

impl<P: Publisher> Player<P> {
    pub fn new(publisher: P, pacing: bool) -> Self {
        Self { publisher, pacing }
    }

    /// Publish every record of `flow` in file order and print
    /// `<offset seconds> <topic> <payload>` for each. With pacing on, a
    /// record is not published before its offset from the start of replay.
    pub async fn play(&mut self, flow: &Flow, out: &mut impl Write) -> Result<usize> {
        let start = Instant::now();
        let mut count = 0;

        for (offset, record) in flow.offsets() {
            if self.pacing {
                let due = start + offset;
                if due > Instant::now() {
                    tokio::time::sleep_until(due).await;
                }
            }

            self.publisher.publish(&record.topic, &record.payload).await?;
            count += 1;

            if let Err(e) = writeln!(out, "{} {} {}", offset.as_secs_f64(), record.topic, record.payload) {
                warn!("Failed to print replayed row: {}", e);
            }
        }

        debug!("Replayed {} rows in {:?}", count, start.elapsed());
        Ok(count)
    }

    pub fn into_publisher(self) -> P {
        self.publisher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        published: Vec<(String, String, Instant)>,
    }

    impl Publisher for Recorder {
        async fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
            self.published
                .push((topic.to_string(), payload.to_string(), Instant::now()));
            Ok(())
        }
    }

    const FLOW: &str = "\
2024-03-01T10:00:00.000 a 1
2024-03-01T10:00:00.100 b {\"x\": 2}
2024-03-01T10:00:00.150 a 3
";

    #[test]
    fn test_replays_in_file_order_and_prints_rows() {
        tokio_test::block_on(async {
            let flow = Flow::parse(FLOW, " ").unwrap();
            let mut player = Player::new(Recorder::default(), false);
            let mut out = Vec::new();

            assert_eq!(player.play(&flow, &mut out).await.unwrap(), 3);

            let printed = String::from_utf8(out).unwrap();
            assert_eq!(printed, "0 a 1\n0.1 b {\"x\": 2}\n0.15 a 3\n");

            let topics: Vec<String> = player
                .into_publisher()
                .published
                .into_iter()
                .map(|(topic, _, _)| topic)
                .collect();
            assert_eq!(topics, vec!["a", "b", "a"]);
        });
    }

    #[test]
    fn test_pacing_respects_offsets() {
        tokio_test::block_on(async {
            let flow = Flow::parse(FLOW, " ").unwrap();
            let mut player = Player::new(Recorder::default(), true);
            let start = Instant::now();

            player.play(&flow, &mut std::io::sink()).await.unwrap();

            let published = player.into_publisher().published;
            assert!(published[1].2 - start >= Duration::from_millis(100));
            assert!(published[2].2 - start >= Duration::from_millis(150));
        });
    }
}
