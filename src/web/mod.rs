//! HTTP front end: snapshot JSON, a live server-sent event stream, and the
//! Prometheus scrape endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::Stream;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bus::{Subscribe, Subscription};
use crate::config::bind_addr;
use crate::metrics::Metrics;
use crate::stats::StatsSupervisor;

/// Shared state for axum handlers.
pub struct AppState {
    pub supervisor: Arc<StatsSupervisor>,
    pub bus: Arc<dyn Subscribe>,
    pub metrics: Arc<Metrics>,
    /// Ends open event streams so graceful shutdown can finish.
    pub shutdown: CancellationToken,
}

/// Build the router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(snapshot_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .route("/subscribe", get(subscribe_handler))
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

/// Bound HTTP server, ready to run.
pub struct WebServer {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl WebServer {
    /// Bind `addr`; ":port" binds all interfaces.
    pub async fn bind(addr: &str, state: Arc<AppState>) -> Result<Self> {
        let addr = bind_addr(addr);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("listening on {addr}"))?;

        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("getting local address")
    }

    /// Serve until `ctx` is cancelled, then drain open connections.
    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        let local_addr = self.local_addr()?;
        info!(addr = %local_addr, "http server started");

        let app = router(self.state);
        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            ctx.cancelled().await;
        })
        .await
        .context("serving http")?;

        info!("http server stopped");
        Ok(())
    }
}

/// GET / and /api/snapshot - current value plus chart series.
async fn snapshot_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(state.supervisor.snapshot()),
    )
}

/// GET /subscribe - one snapshot event now and one per received record.
async fn subscribe_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let feed = SnapshotFeed::open(&state);
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Sse::new(feed.into_stream()).keep_alive(KeepAlive::default()),
    )
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.gather_text() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            error!(error = %e, "encoding metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

/// Per-client event stream state. Dropping it removes the subscription.
struct SnapshotFeed {
    state: Arc<AppState>,
    sub: Subscription,
    primed: bool,
}

impl SnapshotFeed {
    fn open(state: &Arc<AppState>) -> Self {
        let sub = state.bus.subscribe();
        state.metrics.sse_clients.inc();
        debug!(id = sub.id(), "sse client connected");

        Self {
            state: Arc::clone(state),
            sub,
            primed: false,
        }
    }

    fn into_stream(self) -> impl Stream<Item = Result<Event, axum::Error>> {
        futures::stream::unfold(self, |mut feed| async move {
            if feed.primed {
                let shutdown = feed.state.shutdown.clone();
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return None,
                    next = feed.sub.recv() => {
                        next?;
                    }
                }
            }
            feed.primed = true;

            let event = Event::default().json_data(feed.state.supervisor.snapshot());
            Some((event, feed))
        })
    }
}

impl Drop for SnapshotFeed {
    fn drop(&mut self) {
        self.state.bus.unsubscribe(&mut self.sub);
        self.state.metrics.sse_clients.dec();
        debug!(id = self.sub.id(), "sse client disconnected");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{FixedOffset, TimeZone, Utc};
    use futures::StreamExt;
    use tower::ServiceExt;

    use crate::bus::Distributor;
    use crate::codec::Record;
    use crate::stats::Metric;

    struct Harness {
        state: Arc<AppState>,
        bus: Arc<Distributor>,
    }

    fn harness() -> Harness {
        let bus = Arc::new(Distributor::new(4));
        let supervisor = Arc::new(StatsSupervisor::new(
            &Metric::DEFAULT_TRACKED,
            FixedOffset::east_opt(0).unwrap(),
        ));
        let state = Arc::new(AppState {
            supervisor,
            bus: Arc::clone(&bus) as Arc<dyn Subscribe>,
            metrics: Arc::new(Metrics::new().unwrap()),
            shutdown: CancellationToken::new(),
        });
        Harness { state, bus }
    }

    fn record() -> Record {
        Record {
            timestamp: Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap(),
            temperature: 24.5,
            humidity: 41.0,
            pressure: 752.25,
            voltage: 3250.0,
        }
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_healthz() {
        let h = harness();
        let (status, body) = get_body(router(h.state), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_snapshot_json_shape() {
        let h = harness();
        h.state.supervisor.ingest(&record());

        for uri in ["/", "/api/snapshot"] {
            let (status, body) = get_body(router(Arc::clone(&h.state)), uri).await;
            assert_eq!(status, StatusCode::OK);

            let json: serde_json::Value = serde_json::from_str(&body).unwrap();
            assert_eq!(json["current"]["temperature"], 24.5);
            assert_eq!(json["current"]["timestamp"], "2024-07-01T09:00:00Z");

            let point = &json["chart"]["pressure"][0];
            let day = Utc.with_ymd_and_hms(2024, 7, 1, 8, 0, 0).unwrap();
            assert_eq!(point[0], day.timestamp_millis());
            assert_eq!(point[1], 752.25);
        }
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let h = harness();
        h.state.metrics.records_emitted.inc();
        let (status, body) = get_body(router(h.state), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("sensorhub_records_emitted_total 1"));
    }

    #[tokio::test]
    async fn test_subscribe_streams_snapshots() {
        let h = harness();
        let resp = router(Arc::clone(&h.state))
            .oneshot(
                Request::builder()
                    .uri("/subscribe")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let mut body = resp.into_body().into_data_stream();

        let first = body.next().await.unwrap().unwrap();
        let first = String::from_utf8(first.to_vec()).unwrap();
        assert!(first.starts_with("data: "));
        assert!(first.contains(r#""current":null"#));
        assert_eq!(h.bus.len(), 1);
        assert_eq!(h.state.metrics.sse_clients.get(), 1.0);

        // The ingest loop is not running here; feed the supervisor directly
        // and use the bus only as the wake-up.
        h.state.supervisor.ingest(&record());
        h.bus.emit(record());

        let second = body.next().await.unwrap().unwrap();
        let second = String::from_utf8(second.to_vec()).unwrap();
        assert!(second.contains(r#""temperature":24.5"#));

        drop(body);
        assert_eq!(h.bus.len(), 0);
        assert_eq!(h.state.metrics.sse_clients.get(), 0.0);
    }

    #[tokio::test]
    async fn test_subscribe_ends_on_shutdown() {
        let h = harness();
        let resp = router(Arc::clone(&h.state))
            .oneshot(
                Request::builder()
                    .uri("/subscribe")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let mut body = resp.into_body().into_data_stream();

        assert!(body.next().await.is_some());
        h.state.shutdown.cancel();
        assert!(body.next().await.is_none());
        assert_eq!(h.bus.len(), 0);
    }

    #[tokio::test]
    async fn test_server_graceful_shutdown() {
        let h = harness();
        let server = WebServer::bind("127.0.0.1:0", h.state).await.unwrap();
        assert!(server.local_addr().unwrap().port() > 0);

        let ctx = CancellationToken::new();
        let task = tokio::spawn(server.run(ctx.clone()));
        ctx.cancel();
        task.await.unwrap().unwrap();
    }
}
