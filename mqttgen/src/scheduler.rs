//! Round-robin message scheduler.
//!
//! Each [`Scheduler::tick`] walks the ordered message definitions from the
//! cursor until one message is published, then services the broker so that
//! inbound GET/SET commands are handled before the next tick. Everything,
//! command handling included, runs on the caller's task: a SET received while
//! servicing tick N is visible to the evaluations of tick N+1.

use crate::errors::Result;
use crate::eval::{Clock, Evaluator};
use crate::metrics::{
    EVALUATION_FAILURES_TOTAL, GET_COMMANDS_TOTAL, PUBLISHED_TOTAL, PUBLISH_FAILURES_TOTAL,
    REJECTED_COMMANDS_TOTAL, SET_COMMANDS_TOTAL, SUPPRESSED_TOTAL, TICK_SECONDS,
};
use crate::model::GeneratedMessage;
use crate::mqtt::{Broker, BrokerEvent, InboundMessage};
use crate::router::{Dispatch, Router};
use crate::template::MessageSet;
use rand::Rng;
use rumqttc::QoS;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// QoS of GET/SET subscriptions.
const COMMAND_QOS: QoS = QoS::AtLeastOnce;

pub struct Scheduler<B, R, C> {
    broker: B,
    set: MessageSet,
    router: Router,
    evaluator: Evaluator<R, C>,
    qos: QoS,
    cursor: usize,
    /// Set once the cursor wrapped for the first time.
    first_pass_done: bool,
}

impl<B: Broker, R: Rng, C: Clock> Scheduler<B, R, C> {
    /// Subscribe every command topic of `router`. Any failure aborts startup.
    pub async fn start(
        mut broker: B,
        set: MessageSet,
        router: Router,
        evaluator: Evaluator<R, C>,
        qos: QoS,
    ) -> Result<Self> {
        subscribe_all(&mut broker, &router).await?;

        Ok(Self {
            broker,
            set,
            router,
            evaluator,
            qos,
            cursor: 0,
            first_pass_done: false,
        })
    }

    /// Publish the next eligible message, then service the network.
    ///
    /// Returns the published message, or `None` when no eligible message
    /// produced a publish. Positions of the first pass are not counted, so
    /// after it a tick stops once it has scanned one full cycle and every
    /// `sync=false` message is evaluated at most once per tick.
    pub async fn tick(&mut self) -> Option<GeneratedMessage> {
        let mut generated = None;
        let mut scanned = 0;

        while generated.is_none() && scanned < self.set.len() {
            let index = self.cursor;
            let once = self.set.messages[index].once;
            let eligible = if self.first_pass_done { !once } else { once };
            if self.first_pass_done {
                scanned += 1;
            }

            if eligible {
                match self.generate_and_publish(index, false).await {
                    Ok(message) => generated = message,
                    Err(e) => {
                        EVALUATION_FAILURES_TOTAL.inc();
                        let key = &self.set.messages[index].key;
                        if e.is_fatal() {
                            error!("Message {} failed: {}", key, e);
                        } else {
                            warn!("Message {} skipped: {}", key, e);
                        }
                    }
                }
            }

            self.cursor += 1;
            if self.cursor == self.set.len() {
                self.cursor = 0;
                if !self.first_pass_done {
                    debug!("First pass complete");
                    self.first_pass_done = true;
                }
            }
        }

        self.service().await;
        generated
    }

    /// Tick forever, one tick every `interval`.
    pub async fn run(&mut self, interval: Duration) {
        info!("Publishing one message every {:?}", interval);

        loop {
            let tick_start = Instant::now();
            self.tick().await;

            let elapsed = tick_start.elapsed();
            TICK_SECONDS.observe(elapsed.as_secs_f64());
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            } else if elapsed > interval * 2 {
                warn!("Tick took {:?}, target was {:?}", elapsed, interval);
            }
        }
    }

    pub async fn shutdown(&mut self) {
        if let Err(e) = self.broker.disconnect().await {
            warn!("Failed to disconnect cleanly: {}", e);
        }
    }

    /// Evaluate message `index` and publish it when `sync` is set or the
    /// request comes from a GET command (`forced`). Evaluation happens in
    /// both cases so generator state always advances.
    async fn generate_and_publish(&mut self, index: usize, forced: bool) -> Result<Option<GeneratedMessage>> {
        let message = &self.set.messages[index];
        let value = self
            .evaluator
            .evaluate(&message.key, &message.payload, &mut self.set.params)?;

        if !(message.sync || forced) {
            SUPPRESSED_TOTAL.inc();
            debug!("{} evaluated, not published (sync is false)", message.key);
            return Ok(None);
        }

        let generated = GeneratedMessage::new(message.topic.as_str(), value);
        info!("-> {} {}", generated.topic, generated.payload);

        if let Err(e) = self
            .broker
            .publish(&generated.topic, generated.payload.clone(), self.qos, message.retain)
            .await
        {
            PUBLISH_FAILURES_TOTAL.inc();
            return Err(e);
        }
        PUBLISHED_TOTAL.inc();

        Ok(Some(generated))
    }

    /// Drain pending inbound messages, handling each as it arrives.
    async fn service(&mut self) {
        loop {
            match self.broker.next_event().await {
                Ok(Some(BrokerEvent::Message(inbound))) => self.handle_inbound(inbound).await,
                Ok(Some(BrokerEvent::Reconnected)) => {
                    if let Err(e) = subscribe_all(&mut self.broker, &self.router).await {
                        error!("Failed to restore command subscriptions: {}", e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Network servicing interrupted: {}", e);
                    break;
                }
            }
        }
    }

    async fn handle_inbound(&mut self, inbound: InboundMessage) {
        info!("<- {} {}", inbound.topic, String::from_utf8_lossy(&inbound.payload));

        let dispatch = self
            .router
            .dispatch(&inbound.topic, &inbound.payload, &mut self.set.params);

        match dispatch {
            Ok(Dispatch::Ignored) => debug!("No command bound to {}", inbound.topic),
            Ok(Dispatch::Updated { field, value }) => {
                SET_COMMANDS_TOTAL.inc();
                info!("{} set to {}", field, value);
            }
            Ok(Dispatch::Publish { message }) => {
                GET_COMMANDS_TOTAL.inc();
                if let Err(e) = self.generate_and_publish(message, true).await {
                    REJECTED_COMMANDS_TOTAL.inc();
                    error!("GET on {} failed: {}", inbound.topic, e);
                }
            }
            Err(e) => {
                REJECTED_COMMANDS_TOTAL.inc();
                warn!("Dropping command on {}: {}", inbound.topic, e);
            }
        }
    }
}

async fn subscribe_all<B: Broker>(broker: &mut B, router: &Router) -> Result<()> {
    for topic in router.topics() {
        info!("Subscribing to {}", topic);
        broker.subscribe(topic, COMMAND_QOS).await?;
    }
    Ok(())
}
