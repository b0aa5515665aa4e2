use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bus::{BusEvent, Distributor, Subscribe};
use crate::codec::DecodeStats;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::stats::{Metric, StatsSupervisor};
use crate::transport::udp::UdpListener;
use crate::transport::IngestCounters;
use crate::web::{AppState, WebServer};

/// Period of the decode counter report.
const REPORT_INTERVAL: Duration = Duration::from_secs(60);

type TaskResult = (&'static str, Result<()>);

/// Agent wires every component together: transports, distributor,
/// statistics, and the HTTP front end.
///
/// All long-running loops share one cancellation token and one task set.
/// The first failing task cancels the rest.
pub struct Agent {
    cfg: Config,
    metrics: Arc<Metrics>,
    bus: Arc<Distributor>,
    supervisor: Arc<StatsSupervisor>,
    decode_stats: Arc<DecodeStats>,
    cancel: CancellationToken,
    tasks: JoinSet<TaskResult>,
}

impl Agent {
    /// Creates a new Agent, building metrics, the distributor, and the
    /// stats supervisor from `cfg`.
    pub fn new(cfg: Config) -> Result<Self> {
        let metrics = Arc::new(Metrics::new().context("creating metrics")?);

        let bus = {
            let metrics = Arc::clone(&metrics);
            Distributor::new(cfg.bus.inbox_capacity)
                .with_metrics(Box::new(move |ev: BusEvent| metrics.on_bus_event(ev)))
        };

        let tz = cfg.stats.timezone()?;
        let supervisor = {
            let metrics = Arc::clone(&metrics);
            StatsSupervisor::new(&cfg.stats.metrics, tz).with_metrics(Box::new(
                move |metric: Metric, removed: usize, remaining: usize| {
                    metrics.on_evicted(metric, removed, remaining);
                },
            ))
        };

        Ok(Self {
            cfg,
            metrics,
            bus: Arc::new(bus),
            supervisor: Arc::new(supervisor),
            decode_stats: Arc::new(DecodeStats::new()),
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
        })
    }

    /// Token cancelled when the agent begins shutting down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn supervisor(&self) -> &Arc<StatsSupervisor> {
        &self.supervisor
    }

    pub fn bus(&self) -> &Arc<Distributor> {
        &self.bus
    }

    /// Bind every enabled resource and spawn all loops.
    ///
    /// Binding happens before anything is spawned so a bad address fails
    /// startup instead of surfacing later as a task error.
    pub async fn start(&mut self) -> Result<()> {
        let counters = IngestCounters::new(Arc::clone(&self.decode_stats))
            .with_metrics(Arc::clone(&self.metrics));

        // 1. HTTP front end.
        let state = Arc::new(AppState {
            supervisor: Arc::clone(&self.supervisor),
            bus: Arc::clone(&self.bus) as Arc<dyn Subscribe>,
            metrics: Arc::clone(&self.metrics),
            shutdown: self.cancel.clone(),
        });
        let web = WebServer::bind(&self.cfg.http.addr, state)
            .await
            .context("starting http server")?;

        // 2. Transports.
        let udp = if self.cfg.udp.enabled {
            Some(
                UdpListener::bind(&self.cfg.udp.addr, counters.clone())
                    .await
                    .context("starting udp listener")?,
            )
        } else {
            None
        };

        #[cfg(feature = "serial")]
        let serial = if self.cfg.serial.enabled {
            Some(
                crate::transport::serial::SerialReader::open(
                    &self.cfg.serial.port,
                    self.cfg.serial.baud_rate,
                    counters.clone(),
                )
                .context("starting serial reader")?,
            )
        } else {
            None
        };
        #[cfg(not(feature = "serial"))]
        if self.cfg.serial.enabled {
            bail!("serial transport is enabled but this build lacks the serial feature");
        }

        #[cfg(feature = "mqtt")]
        let mqtt = if self.cfg.mqtt.enabled {
            Some(
                crate::transport::mqtt::MqttSubscriber::new(&self.cfg.mqtt, counters.clone())
                    .context("starting mqtt subscriber")?,
            )
        } else {
            None
        };
        #[cfg(not(feature = "mqtt"))]
        if self.cfg.mqtt.enabled {
            bail!("mqtt transport is enabled but this build lacks the mqtt feature");
        }

        // 3. Statistics. Subscribe before any producer can emit.
        {
            let supervisor = Arc::clone(&self.supervisor);
            let bus = Arc::clone(&self.bus);
            let ctx = self.cancel.child_token();
            self.tasks.spawn(async move {
                ("stats-ingest", supervisor.run_ingest(ctx, bus.as_ref()).await)
            });
        }
        {
            let supervisor = Arc::clone(&self.supervisor);
            let ctx = self.cancel.child_token();
            let interval = self.cfg.stats.eviction_interval;
            let retention = self.cfg.stats.retention;
            self.tasks.spawn(async move {
                (
                    "stats-eviction",
                    supervisor.run_eviction(ctx, interval, retention).await,
                )
            });
        }

        // 4. Producers.
        if let Some(udp) = udp {
            let bus = Arc::clone(&self.bus);
            let ctx = self.cancel.child_token();
            self.tasks
                .spawn(async move { ("udp", udp.run(ctx, bus.as_ref()).await) });
        }

        #[cfg(feature = "serial")]
        if let Some(serial) = serial {
            let bus = Arc::clone(&self.bus);
            let ctx = self.cancel.child_token();
            let tag = self.cfg.serial.tag.clone();
            self.tasks
                .spawn(async move { ("serial", serial.run(ctx, &tag, bus.as_ref()).await) });
        }

        #[cfg(feature = "mqtt")]
        if let Some(mqtt) = mqtt {
            let bus = Arc::clone(&self.bus);
            let ctx = self.cancel.child_token();
            self.tasks
                .spawn(async move { ("mqtt", mqtt.run(ctx, bus.as_ref()).await) });
        }

        // 5. HTTP and background reporting.
        {
            let ctx = self.cancel.child_token();
            self.tasks
                .spawn(async move { ("http", web.run(ctx).await) });
        }
        self.spawn_stats_reporter();

        info!(
            udp = self.cfg.udp.enabled,
            serial = self.cfg.serial.enabled,
            mqtt = self.cfg.mqtt.enabled,
            metrics = ?self.cfg.stats.metrics,
            "agent fully started",
        );

        Ok(())
    }

    /// Wait for `shutdown`, a task error, or every task to finish; then
    /// cancel and join the rest and close the distributor.
    ///
    /// Returns the first task error, if any.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let mut signalled = false;
        let mut first_err: Option<anyhow::Error> = None;

        loop {
            tokio::select! {
                _ = &mut shutdown, if !signalled => {
                    signalled = true;
                    info!("shutdown requested");
                    self.cancel.cancel();
                }
                joined = self.tasks.join_next() => {
                    let Some(joined) = joined else { break };

                    match joined {
                        Ok((name, Ok(()))) => {
                            debug!(task = name, "task finished");
                        }
                        Ok((name, Err(e))) => {
                            error!(task = name, error = %format!("{e:#}"), "task failed");
                            if first_err.is_none() {
                                first_err = Some(e.context(format!("task {name} failed")));
                            }
                            self.cancel.cancel();
                        }
                        Err(e) => {
                            error!(error = %e, "task panicked");
                            if first_err.is_none() {
                                first_err = Some(anyhow!("task panicked: {e}"));
                            }
                            self.cancel.cancel();
                        }
                    }
                }
            }
        }

        self.cancel.cancel();
        self.bus.close();
        info!("agent stopped");

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Spawn the periodic decode counter report.
    fn spawn_stats_reporter(&mut self) {
        let cancel = self.cancel.child_token();
        let decode_stats = Arc::clone(&self.decode_stats);
        let supervisor = Arc::clone(&self.supervisor);
        let metrics = Arc::clone(&self.metrics);

        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(REPORT_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return ("stats-reporter", Ok(())),
                    _ = ticker.tick() => {
                        for (metric, days) in supervisor.tracked_days() {
                            metrics.set_tracked_days(metric, days);
                        }

                        let snapshot = decode_stats.snapshot();
                        let accepted: u64 = snapshot.iter().map(|(_, c)| c.accepted).sum();
                        let rejected: u64 = snapshot.iter().map(|(_, c)| c.rejected).sum();

                        if accepted + rejected == 0 {
                            continue;
                        }

                        info!(accepted, rejected, "decode stats (60s)");

                        for (transport, counts) in &snapshot {
                            debug!(
                                transport = %transport,
                                accepted = counts.accepted,
                                rejected = counts.rejected,
                                "  by transport (60s)",
                            );
                        }
                    }
                }
            }
        });
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("registering SIGTERM handler")?;

        tokio::select! {
            res = ctrl_c => {
                res.context("waiting for SIGINT")?;
                info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("waiting for SIGINT")?;
        info!("received SIGINT, shutting down");
    }

    Ok(())
}
