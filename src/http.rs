//! JSON HTTP API over the investigation service and the classifier boundary.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::classifier::{Assessment, Classifier};
use crate::config::Config;
use crate::error::{FraudGraphError, Result};
use crate::graph::GraphStore;
use crate::ingest::{publish_event, EventChannel, PublishReceipt};
use crate::investigate::{InvestigationService, NetworkReport, PhoneInvestigation, UpiInvestigation};
use crate::seed::{BulkLoader, GraphStatistics};

const MAX_BATCH_MESSAGES: usize = 20;
const DEFAULT_NETWORK_DEPTH: usize = 2;
const MAX_NETWORK_DEPTH: usize = 6;

/// Check if a port is available by attempting to bind to it
async fn check_port_available(port: u16) -> bool {
    tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await.is_ok()
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    investigation: InvestigationService,
    loader: Arc<BulkLoader>,
    channel: Arc<dyn EventChannel>,
    classifier: Option<Arc<dyn Classifier>>,
    action_confidence: f64,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn GraphStore>,
        channel: Arc<dyn EventChannel>,
        classifier: Option<Arc<dyn Classifier>>,
    ) -> Self {
        Self {
            investigation: InvestigationService::from_config(config, Arc::clone(&store)),
            loader: Arc::new(BulkLoader::from_config(config, store)),
            channel,
            classifier,
            action_confidence: config
                .classifier
                .as_ref()
                .map(|c| c.action_confidence)
                .unwrap_or(0.7),
        }
    }
}

pub struct HttpApiServer {
    state: AppState,
    allowed_origins: Vec<String>,
}

impl HttpApiServer {
    pub fn new(state: AppState, allowed_origins: Vec<String>) -> Self {
        Self { state, allowed_origins }
    }

    pub async fn run(&self, port: u16) -> Result<()> {
        let addr = format!("127.0.0.1:{}", port);

        if !check_port_available(port).await {
            return Err(FraudGraphError::Configuration(format!(
                "Port {} is already in use. Stop the other process or set http_server.port in config.toml",
                port
            )));
        }

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        log::info!("Investigation API listening on http://{}", addr);
        self.serve(listener).await
    }

    /// Serve on an already-bound listener
    pub async fn serve(&self, listener: tokio::net::TcpListener) -> Result<()> {
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    pub fn router(&self) -> Router {
        // No origins configured means local use: allow any
        let cors = if self.allowed_origins.is_empty() {
            CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
        } else {
            let origins: Vec<axum::http::HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .route("/api/health", get(handle_health))
            .route("/api/classify", post(handle_classify))
            .route("/api/batch", post(handle_batch))
            .route("/api/investigate/upi/:vpa", get(handle_investigate_upi))
            .route("/api/investigate/phone/:number", get(handle_investigate_phone))
            .route("/api/network/:identifier", get(handle_network))
            .route("/api/rings", get(handle_rings))
            .route("/api/stats", get(handle_stats))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
            .with_state(self.state.clone())
    }
}

/// Error body with a status derived from the error kind
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<FraudGraphError> for ApiError {
    fn from(err: FraudGraphError) -> Self {
        let status = match &err {
            FraudGraphError::Validation(_) | FraudGraphError::Parse(_) => StatusCode::BAD_REQUEST,
            FraudGraphError::Connectivity(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("Request failed: {}", err);
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "fraudgraph",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    #[serde(default)]
    pub message: String,
    pub source: Option<String>,
    pub sender: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    #[serde(flatten)]
    pub assessment: Assessment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<PublishReceipt>,
}

async fn handle_classify(
    State(state): State<AppState>,
    Json(request): Json<ClassifyRequest>,
) -> ApiResult<ClassifyResponse> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(FraudGraphError::Validation("No message".to_string()).into());
    }
    let Some(classifier) = state.classifier.as_ref() else {
        return Err(ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "no classifier configured".to_string(),
        });
    };

    let source = request.source.as_deref().unwrap_or("unknown");
    let sender = request.sender.as_deref().unwrap_or("unknown");
    let classification = classifier.classify(message).await?;

    // Publishing is best effort; the caller still gets the verdict
    let event = if classification.is_scam {
        match publish_event(state.channel.as_ref(), classification.to_event(source, sender, message)).await {
            Ok(receipt) => Some(receipt),
            Err(err) => {
                log::error!("Failed to publish fraud event: {}", err);
                None
            }
        }
    } else {
        None
    };

    let assessment =
        Assessment::from_classification(classification, source, sender, message, state.action_confidence);
    Ok(Json(ClassifyResponse { assessment, event }))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub messages: Vec<ClassifyRequest>,
}

/// One batch entry: the assessment, or why that message failed
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    Assessed(Box<Assessment>),
    Failed { error: String, message: String },
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub results: Vec<BatchItem>,
    pub count: usize,
}

/// Classify 1..=20 messages. Verdicts are not published; a failing message
/// is reported in place and does not fail the batch.
async fn handle_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<BatchResponse> {
    if request.messages.is_empty() || request.messages.len() > MAX_BATCH_MESSAGES {
        return Err(FraudGraphError::Validation(format!(
            "Provide 1-{} messages, got {}",
            MAX_BATCH_MESSAGES,
            request.messages.len()
        ))
        .into());
    }
    let Some(classifier) = state.classifier.as_ref() else {
        return Err(ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "no classifier configured".to_string(),
        });
    };

    let mut results = Vec::with_capacity(request.messages.len());
    for item in request.messages {
        let message = item.message.trim();
        let source = item.source.as_deref().unwrap_or("batch");
        let sender = item.sender.as_deref().unwrap_or("unknown");

        let outcome = if message.is_empty() {
            Err(FraudGraphError::Validation("No message".to_string()))
        } else {
            classifier.classify(message).await
        };
        results.push(match outcome {
            Ok(classification) => BatchItem::Assessed(Box::new(Assessment::from_classification(
                classification,
                source,
                sender,
                message,
                state.action_confidence,
            ))),
            Err(err) => {
                log::warn!("Batch item failed: {}", err);
                BatchItem::Failed {
                    error: err.to_string(),
                    message: item.message.clone(),
                }
            }
        });
    }

    let count = results.len();
    Ok(Json(BatchResponse { results, count }))
}

async fn handle_investigate_upi(
    State(state): State<AppState>,
    Path(vpa): Path<String>,
) -> ApiResult<UpiInvestigation> {
    Ok(Json(state.investigation.investigate_upi(&vpa).await?))
}

async fn handle_investigate_phone(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> ApiResult<PhoneInvestigation> {
    Ok(Json(state.investigation.investigate_phone(&number).await?))
}

#[derive(Debug, Deserialize)]
struct NetworkParams {
    depth: Option<usize>,
}

async fn handle_network(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    Query(params): Query<NetworkParams>,
) -> ApiResult<NetworkReport> {
    let depth = params.depth.unwrap_or(DEFAULT_NETWORK_DEPTH).min(MAX_NETWORK_DEPTH);
    Ok(Json(state.investigation.related_network(&identifier, depth).await?))
}

#[derive(Debug, Deserialize)]
struct RingParams {
    threshold: Option<usize>,
}

#[derive(Debug, Serialize)]
struct RingsResponse {
    threshold: usize,
    rings: std::collections::BTreeSet<String>,
}

async fn handle_rings(
    State(state): State<AppState>,
    Query(params): Query<RingParams>,
) -> ApiResult<RingsResponse> {
    let threshold = params.threshold.unwrap_or(state.investigation.ring_threshold());
    let rings = state.investigation.find_scam_rings(Some(threshold)).await?;
    Ok(Json(RingsResponse { threshold, rings }))
}

async fn handle_stats(State(state): State<AppState>) -> ApiResult<GraphStatistics> {
    Ok(Json(state.loader.report_statistics().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{parse_classification, Classification};
    use crate::graph::MemoryGraphStore;
    use crate::ingest::MemoryEventChannel;
    use crate::seed::Dataset;
    use async_trait::async_trait;

    struct CannedClassifier(Classification);

    #[async_trait]
    impl Classifier for CannedClassifier {
        async fn classify(&self, message: &str) -> Result<Classification> {
            if message.contains("timeout") {
                return Err(FraudGraphError::Connectivity("classifier timed out".to_string()));
            }
            Ok(self.0.clone())
        }
    }

    fn test_config() -> Config {
        Config::from_toml_str("[graph]\ndb_path = \"unused.db\"\n").unwrap()
    }

    async fn spawn_api(classifier: Option<Arc<dyn Classifier>>) -> (String, Arc<MemoryEventChannel>) {
        let config = test_config();
        let store = Arc::new(MemoryGraphStore::new());
        BulkLoader::new(store.clone(), 2)
            .seed_dataset(&Dataset::baseline())
            .await
            .unwrap();
        let channel = Arc::new(MemoryEventChannel::new(4));

        let state = AppState::new(&config, store, channel.clone(), classifier);
        let server = HttpApiServer::new(state, Vec::new());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { server.serve(listener).await.unwrap() });
        (base, channel)
    }

    async fn get_json(url: String) -> (StatusCode, serde_json::Value) {
        let response = reqwest::get(url).await.unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        (status, response.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_investigation_routes() {
        let (base, _channel) = spawn_api(None).await;

        let (status, health) = get_json(format!("{}/api/health", base)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "healthy");

        let (_, phone) = get_json(format!("{}/api/investigate/phone/+91-9876500003", base)).await;
        assert_eq!(phone["found"], true);
        assert_eq!(phone["is_ring"], true);
        assert_eq!(phone["operated_upis"].as_array().unwrap().len(), 3);

        let (_, upi) = get_json(format!("{}/api/investigate/upi/nonexistent@upi", base)).await;
        assert_eq!(upi["found"], false);
        assert!(upi["related_phones"].as_array().unwrap().is_empty());

        let (_, rings) = get_json(format!("{}/api/rings?threshold=3", base)).await;
        assert_eq!(rings["rings"], serde_json::json!(["+91-9876500003", "+91-9876500010"]));

        let (_, network) = get_json(format!("{}/api/network/refund.process@paytm?depth=1", base)).await;
        assert_eq!(network["links"].as_array().unwrap().len(), 1);

        let (_, stats) = get_json(format!("{}/api/stats", base)).await;
        assert_eq!(stats["total_edges"], 17);
    }

    #[tokio::test]
    async fn test_classify_publishes_scams() {
        let classification = parse_classification(
            r#"{"is_scam": true, "category": "kyc_freeze", "confidence": 0.9, "risk_level": "high"}"#,
        )
        .unwrap();
        let (base, channel) = spawn_api(Some(Arc::new(CannedClassifier(classification)))).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/api/classify", base))
            .json(&serde_json::json!({"message": "Your SBI KYC expired", "source": "sms"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["action_required"], true);
        assert_eq!(body["helpline"], "1930");

        let partition = body["event"]["partition"].as_u64().unwrap() as u32;
        let delivery = channel
            .receive(partition, 0, std::time::Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert!(delivery.payload.contains("kyc_freeze"));

        let empty = client
            .post(format!("{}/api/classify", base))
            .json(&serde_json::json!({"message": "   "}))
            .send()
            .await
            .unwrap();
        assert_eq!(empty.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn test_classify_without_classifier_is_unavailable() {
        let (base, _channel) = spawn_api(None).await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/classify", base))
            .json(&serde_json::json!({"message": "hello"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 503);
    }

    #[tokio::test]
    async fn test_batch_reports_items_in_place() {
        let classification = parse_classification(
            r#"{"is_scam": true, "category": "lottery_scam", "confidence": 0.88, "risk_level": "high"}"#,
        )
        .unwrap();
        let (base, channel) = spawn_api(Some(Arc::new(CannedClassifier(classification)))).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/api/batch", base))
            .json(&serde_json::json!({"messages": [
                {"message": "KBC me Rs.25 lakh jeete hain"},
                {"message": "simulate a timeout please", "source": "eval"},
                {"message": ""}
            ]}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["count"], 3);
        assert_eq!(body["results"][0]["category"], "lottery_scam");
        assert_eq!(body["results"][0]["source"], "batch");
        assert!(body["results"][1]["error"].as_str().unwrap().contains("timed out"));
        assert_eq!(body["results"][1]["message"], "simulate a timeout please");
        assert!(body["results"][2]["error"].is_string());

        // batch verdicts stay out of the ingestion stream
        for partition in 0..4 {
            assert!(channel
                .receive(partition, 0, std::time::Duration::ZERO)
                .await
                .unwrap()
                .is_none());
        }
    }

    #[tokio::test]
    async fn test_batch_size_bounds() {
        let classification = parse_classification(
            r#"{"is_scam": false, "category": "legitimate", "confidence": 0.2, "risk_level": "low"}"#,
        )
        .unwrap();
        let (base, _channel) = spawn_api(Some(Arc::new(CannedClassifier(classification)))).await;
        let client = reqwest::Client::new();

        let empty = client
            .post(format!("{}/api/batch", base))
            .json(&serde_json::json!({"messages": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(empty.status().as_u16(), 400);

        let messages: Vec<_> = (0..21).map(|i| serde_json::json!({"message": format!("msg {}", i)})).collect();
        let oversized = client
            .post(format!("{}/api/batch", base))
            .json(&serde_json::json!({ "messages": messages }))
            .send()
            .await
            .unwrap();
        assert_eq!(oversized.status().as_u16(), 400);

        let full: Vec<_> = (0..20).map(|i| serde_json::json!({"message": format!("msg {}", i)})).collect();
        let response = client
            .post(format!("{}/api/batch", base))
            .json(&serde_json::json!({ "messages": full }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["count"], 20);
    }
}
