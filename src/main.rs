//! Stream Bridge HTTP ingest.
//!
//! Accepts events over HTTP and publishes them to Redis Streams.
//!
//! ## Endpoints
//!
//! - `GET /health`: Redis PING
//! - `GET /metrics`: request counters and uptime
//! - `POST /api/v1/streams/:stream/events`: publish `{ "payload": .., "metadata": {..} }`
//!
//! When `[[producers]]` are configured, only those streams are accepted.

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use streambridge::config::BridgeConfig;
use streambridge::producer::{OutboundMessage, StreamProducer};
use streambridge::store::{RedisStore, StreamStore};
use streambridge::{BridgeError, RedisConnector};

/// Header carrying the caller's correlation id.
const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Envelope header the correlation id is stored under.
const CORRELATION_FIELD: &str = "correlationId";

/// Application metrics
struct Metrics {
    events_received: AtomicU64,
    events_published: AtomicU64,
    publish_failures: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

struct AppState {
    redis: RedisStore,
    store: Arc<dyn StreamStore>,
    /// Configured producer endpoints by stream; empty means any stream
    producers: HashMap<String, StreamProducer>,
    default_service: Option<String>,
    api_key: String,
    metrics: Metrics,
}

impl AppState {
    fn producer_for(&self, stream: &str) -> Result<StreamProducer, StatusCode> {
        if let Some(producer) = self.producers.get(stream) {
            return Ok(producer.clone());
        }
        if !self.producers.is_empty() {
            warn!(stream = %stream, "Publish to unconfigured stream rejected");
            return Err(StatusCode::NOT_FOUND);
        }

        let producer = StreamProducer::new(Arc::clone(&self.store), stream)
            .map_err(|_| StatusCode::BAD_REQUEST)?;
        Ok(match &self.default_service {
            Some(service) => producer.with_service_name(service.as_str()),
            None => producer,
        })
    }
}

/// Body of a publish request.
#[derive(Debug, Deserialize)]
struct PublishRequest {
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

/// Response returned when an event is successfully accepted.
#[derive(Debug, Serialize, Deserialize)]
struct EventResponse {
    /// Stream entry id assigned to the event
    id: String,
    status: String,
    #[serde(rename = "correlationId")]
    correlation_id: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    streambridge::init_logging();

    let config = BridgeConfig::load()?;

    let api_key = config
        .server
        .api_key
        .clone()
        .or_else(|| env::var("STREAMBRIDGE_API_KEY").ok())
        .unwrap_or_else(|| {
            warn!("No API key configured, defaulting to 'dev-key'. DO NOT USE IN PRODUCTION.");
            "dev-key".to_string()
        });

    let connector = RedisConnector::from_config(&config.redis);
    let redis = RedisStore::new(connector.pool().await?);
    let store: Arc<dyn StreamStore> = Arc::new(redis.clone());

    let mut producers = HashMap::new();
    for endpoint in &config.producers {
        let service = config.service_name_for(endpoint);
        let producer =
            StreamProducer::from_endpoint(Arc::clone(&store), endpoint, service.as_deref())?;
        producers.insert(endpoint.stream.clone(), producer);
    }

    let app_state = Arc::new(AppState {
        redis,
        store,
        producers,
        default_service: config.bridge.service_name.clone(),
        api_key,
        metrics: Metrics::new(),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .route("/api/v1/streams/:stream/events", post(publish_event))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            auth_middleware,
        ))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Stream Bridge listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // Skip auth for health check and metrics
    let path = req.uri().path();
    if path == "/health" || path == "/metrics" {
        return Ok(next.run(req).await);
    }

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "));

    match token {
        Some(token) if token == state.api_key => Ok(next.run(req).await),
        Some(_) => {
            warn!("Invalid API Key attempt");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!("Missing or malformed Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<Value>, StatusCode> {
    state.redis.ping().await.map_err(|e| {
        error!("Redis PING failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(json!({ "status": "ok", "redis": "connected" })))
}

/// Get metrics endpoint - returns server metrics as JSON
async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime = state.metrics.uptime_seconds();

    let uptime_str = if uptime < 60 {
        format!("{}s", uptime)
    } else if uptime < 3600 {
        format!("{}m {}s", uptime / 60, uptime % 60)
    } else {
        format!("{}h {}m {}s", uptime / 3600, (uptime % 3600) / 60, uptime % 60)
    };

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime,
        "uptime": uptime_str,
        "events": {
            "received": state.metrics.events_received.load(Ordering::Relaxed),
            "published": state.metrics.events_published.load(Ordering::Relaxed),
            "failed": state.metrics.publish_failures.load(Ordering::Relaxed),
        },
        "status": "running"
    }))
}

async fn publish_event(
    State(state): State<Arc<AppState>>,
    Path(stream): Path<String>,
    headers: HeaderMap,
    Json(request): Json<PublishRequest>,
) -> Result<(StatusCode, Json<EventResponse>), StatusCode> {
    state.metrics.events_received.fetch_add(1, Ordering::Relaxed);

    let correlation_id = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    debug!(
        stream = %stream,
        correlation_id = %correlation_id,
        metadata_keys = request.metadata.len(),
        "Received publish request"
    );

    let producer = state.producer_for(&stream)?;

    let mut message = OutboundMessage {
        body: request.payload.filter(|p| !p.is_null()).map(Into::into),
        metadata: request.metadata,
    };
    message
        .metadata
        .insert(CORRELATION_FIELD.to_string(), json!(correlation_id));

    let id = producer.publish_message(message).await.map_err(|e| {
        state.metrics.publish_failures.fetch_add(1, Ordering::Relaxed);
        match e {
            BridgeError::Configuration(reason) => {
                warn!(stream = %stream, reason = %reason, "Rejected publish request");
                StatusCode::BAD_REQUEST
            }
            other => {
                error!(stream = %stream, error = %other, "Failed to publish event");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    })?;

    state.metrics.events_published.fetch_add(1, Ordering::Relaxed);
    info!(
        id = %id,
        stream = %stream,
        correlation_id = %correlation_id,
        "Event published"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(EventResponse {
            id,
            status: "accepted".to_string(),
            correlation_id,
        }),
    ))
}
