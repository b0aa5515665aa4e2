use std::time::Duration;

use anyhow::{bail, Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{forward, IngestCounters};
use crate::bus::Publish;
use crate::codec::{decode_frame, Transport};
use crate::config::MqttConfig;

const DEFAULT_PORT: u16 = 1883;

/// Requests buffered between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 10;

/// Time allowed for the DISCONNECT packet to leave on shutdown.
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

/// Split a broker URL of the form `tcp://host:port` into host and port.
/// The scheme and port are optional.
pub fn parse_broker(broker: &str) -> Result<(String, u16)> {
    let rest = match broker.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some((scheme, _)) => bail!("unsupported broker scheme {scheme:?}"),
        None => broker,
    };

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("parsing broker port {port:?}"))?;
            (host, port)
        }
        None => (rest, DEFAULT_PORT),
    };

    if host.is_empty() {
        bail!("broker {broker:?} has no host");
    }

    Ok((host.to_string(), port))
}

/// MQTT subscriber decoding radio-relay frames from one topic.
pub struct MqttSubscriber {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
    reconnect_delay: Duration,
    counters: IngestCounters,
}

impl MqttSubscriber {
    /// Build the client. No connection is made until [`run`](Self::run).
    pub fn new(cfg: &MqttConfig, counters: IngestCounters) -> Result<Self> {
        let (host, port) = parse_broker(&cfg.broker)?;

        let mut options = MqttOptions::new(cfg.client_id.clone(), host, port);
        options.set_keep_alive(cfg.keep_alive);
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        Ok(Self {
            client,
            eventloop,
            topic: cfg.topic.clone(),
            reconnect_delay: cfg.reconnect_delay,
            counters,
        })
    }

    /// Poll the connection and forward frames until cancelled, then
    /// disconnect. Connection errors are retried after the configured delay.
    pub async fn run(mut self, ctx: CancellationToken, bus: &impl Publish) -> Result<()> {
        loop {
            let event = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!(code = ?ack.code, topic = %self.topic, "mqtt connected");
                    // Clean sessions drop subscriptions on reconnect.
                    self.client
                        .try_subscribe(self.topic.clone(), QoS::AtMostOnce)
                        .context("queueing mqtt subscribe")?;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.handle_payload(&publish.payload, bus);
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => {
                    debug!(topic = %self.topic, "mqtt subscribed");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, delay = ?self.reconnect_delay, "mqtt connection error");
                    tokio::select! {
                        _ = ctx.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }

        self.disconnect().await;
        Ok(())
    }

    fn handle_payload(&self, payload: &[u8], bus: &impl Publish) {
        debug!(payload = %hex::encode(payload), "mqtt frame");
        forward(Transport::Mqtt, decode_frame(payload), bus, &self.counters);
    }

    async fn disconnect(&mut self) {
        if self.client.try_disconnect().is_err() {
            return;
        }

        let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        if flushed.is_err() {
            debug!("mqtt disconnect timed out");
        }
        info!("mqtt subscriber stopped");
    }
}
