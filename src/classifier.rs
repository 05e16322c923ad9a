//! Scam classifier client for an OpenAI-compatible chat completions endpoint.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ClassifierConfig;
use crate::error::{FraudGraphError, Result};
use crate::graph::model::validate_confidence;
use crate::graph::{Category, RiskLevel};
use crate::ingest::ClassificationEvent;

pub const REPORT_URL: &str = "https://cybercrime.gov.in";
pub const HELPLINE: &str = "1930";

const SYSTEM_PROMPT: &str = r#"You are FraudShield, a UPI fraud detection system for India.
Analyze the given message and classify it.

CATEGORIES:
- fake_cashback: Fake cashback/refund, asks to approve collect requests
- digital_arrest: Impersonates police/CBI/customs, threatens arrest
- kyc_freeze: Claims KYC expired, asks for OTP or UPI PIN
- job_scam: Fake job requiring deposit/fee via UPI
- lottery_scam: Fake prize/lottery, asks for processing fee
- govt_impersonation: Fake e-challan, tax notice with phishing link
- phishing_link: Suspicious link to steal credentials
- legitimate: Safe, genuine message

Respond ONLY with valid JSON (no markdown, no backticks):
{
  "is_scam": true/false,
  "category": "category_name",
  "confidence": 0.0 to 1.0,
  "risk_level": "high/medium/low",
  "explanation_en": "1-2 sentence English explanation",
  "explanation_hi": "1-2 sentence Hindi explanation",
  "red_flags": ["flag1", "flag2"]
}"#;

/// The classifier's verdict on one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub is_scam: bool,
    pub category: Category,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub explanation_en: String,
    #[serde(default)]
    pub explanation_hi: String,
    #[serde(default)]
    pub red_flags: Vec<String>,
}

impl Classification {
    /// Event for the ingestion channel; the id is assigned at publish time
    pub fn to_event(&self, source: &str, sender: &str, message: &str) -> ClassificationEvent {
        ClassificationEvent {
            event_id: None,
            category: self.category,
            confidence: self.confidence,
            risk_level: self.risk_level,
            source: source.to_string(),
            sender: sender.to_string(),
            message: Some(message.to_string()),
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, message: &str) -> Result<Classification>;
}

/// Strip markdown fences from a model reply and decode it
pub fn parse_classification(reply: &str) -> Result<Classification> {
    let text = reply.replace("```json", "").replace("```", "");
    let classification: Classification = serde_json::from_str(text.trim())
        .map_err(|e| FraudGraphError::Parse(format!("classifier reply is not a classification: {}", e)))?;
    validate_confidence(classification.confidence)?;
    Ok(classification)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct OpenAiClassifier {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClassifier {
    pub fn new(api_key: String, base_url: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FraudGraphError::Configuration(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    /// Build from `[classifier]`, reading the key from the configured env var
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            FraudGraphError::Configuration(format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                config.api_key_env
            ))
        })?;
        Self::new(api_key, config.base_url.clone(), config.model.clone())
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(&self, message: &str) -> Result<Classification> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format!("Analyze: {}", message),
                },
            ],
            temperature: 0.1,
            max_tokens: 500,
        };

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| FraudGraphError::Connectivity(format!("classifier network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FraudGraphError::Configuration(format!(
                    "classifier rejected credentials ({}): {}",
                    status, body
                )),
                _ => FraudGraphError::Connectivity(format!("classifier error {}: {}", status, body)),
            });
        }

        let mut reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| FraudGraphError::Parse(format!("Failed to parse response: {}", e)))?;
        if reply.choices.is_empty() {
            return Err(FraudGraphError::Parse("classifier returned no choices".to_string()));
        }
        let content = reply.choices.swap_remove(0).message.content;
        log::debug!("Classifier call took {:?}", start.elapsed());

        parse_classification(&content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplaintForm {
    pub form_type: String,
    pub category: Category,
    pub filing_url: String,
    pub helpline: String,
    pub instructions_hi: String,
}

/// A classification plus the follow-up guidance returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    #[serde(flatten)]
    pub classification: Classification,
    pub source: String,
    pub sender: String,
    pub original_message: String,
    pub action_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helpline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complaint_form: Option<ComplaintForm>,
}

impl Assessment {
    /// Action is required for a scam whose confidence is strictly above `action_confidence`.
    pub fn from_classification(
        classification: Classification,
        source: &str,
        sender: &str,
        message: &str,
        action_confidence: f64,
    ) -> Self {
        let action_required = classification.is_scam && classification.confidence > action_confidence;
        let complaint_form = action_required.then(|| ComplaintForm {
            form_type: "NCRP_Financial_Fraud".to_string(),
            category: classification.category,
            filing_url: REPORT_URL.to_string(),
            helpline: HELPLINE.to_string(),
            instructions_hi: "Is form ko cybercrime.gov.in par submit karein ya 1930 par call karein."
                .to_string(),
        });

        Self {
            source: source.to_string(),
            sender: sender.to_string(),
            original_message: message.to_string(),
            action_required,
            report_url: action_required.then(|| REPORT_URL.to_string()),
            helpline: action_required.then(|| HELPLINE.to_string()),
            complaint_form,
            classification,
        }
    }
}
