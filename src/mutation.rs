//! Scam mutation tracking: embed known scam templates and flag the pairs
//! similar enough to be rewrites of one another.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ClassifierConfig;
use crate::error::{FraudGraphError, Result};

/// Pairs scoring strictly above this share one social engineering pattern
pub const MUTATION_THRESHOLD: f64 = 0.82;

const MAX_RETRIES: usize = 3;

/// Known scam scripts, oldest first
pub const SCAM_TEMPLATES: &[(&str, &str)] = &[
    (
        "KBC Lottery 2020",
        "Badhai ho! Aapne KBC me Rs.25 lakh jeete hain. Registration fee Rs.5,000 bhejein.",
    ),
    (
        "Jio Lucky Draw 2021",
        "Congratulations! Aapne Jio Lucky Draw me Rs.50 lakh jeete. Processing fee Rs.10,000.",
    ),
    (
        "Fake Cashback 2022",
        "Google Pay se aapko Rs.1,500 cashback mila hai. Collect request approve karein.",
    ),
    (
        "KYC Freeze 2023",
        "Your SBI account will be frozen in 24 hours. Update KYC immediately. Share OTP.",
    ),
    (
        "Digital Arrest 2024",
        "CBI officer here. Your Aadhaar is linked to money laundering. Transfer Rs.50,000 or face arrest.",
    ),
    (
        "E-Challan Phishing 2025",
        "Overspeeding Notice: Pay dues immediately to prevent legal action. https://echallane.vip/in",
    ),
];

#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Cosine similarity; 0.0 when either vector has no magnitude or the lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSimilarity {
    pub template_a: String,
    pub template_b: String,
    /// Rounded to three decimals
    pub similarity: f64,
    pub mutation: bool,
}

/// Score every unordered pair of templates, in template order.
pub async fn compare_templates(
    embedder: &dyn Embedder,
    templates: &[(&str, &str)],
) -> Result<Vec<TemplateSimilarity>> {
    let texts: Vec<String> = templates.iter().map(|(_, text)| text.to_string()).collect();
    let vectors = embedder.embed(&texts).await?;
    if vectors.len() != templates.len() {
        return Err(FraudGraphError::Parse(format!(
            "expected {} embeddings, got {}",
            templates.len(),
            vectors.len()
        )));
    }

    let mut pairs = Vec::new();
    for i in 0..templates.len() {
        for j in (i + 1)..templates.len() {
            let similarity = cosine_similarity(&vectors[i], &vectors[j]);
            if similarity > MUTATION_THRESHOLD {
                log::info!(
                    "Mutation detected: {} <-> {} ({:.3})",
                    templates[i].0,
                    templates[j].0,
                    similarity
                );
            }
            pairs.push(TemplateSimilarity {
                template_a: templates[i].0.to_string(),
                template_b: templates[j].0.to_string(),
                similarity: (similarity * 1000.0).round() / 1000.0,
                mutation: similarity > MUTATION_THRESHOLD,
            });
        }
    }
    Ok(pairs)
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    retry_delay: Duration,
}

impl OpenAiEmbedder {
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
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Same endpoint and key as the classifier, with `embedding_model`
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            FraudGraphError::Configuration(format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                config.api_key_env
            ))
        })?;
        Self::new(api_key, config.base_url.clone(), config.embedding_model.clone())
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| FraudGraphError::Connectivity(format!("embeddings network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FraudGraphError::Configuration(format!(
                    "embeddings endpoint rejected credentials ({}): {}",
                    status, body
                )),
                _ => FraudGraphError::Connectivity(format!("embeddings error {}: {}", status, body)),
            });
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| FraudGraphError::Parse(format!("Failed to parse response: {}", e)))?;
        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut delay = self.retry_delay;
        let mut attempt = 0;
        loop {
            match self.request(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_retryable() && attempt + 1 < MAX_RETRIES => {
                    attempt += 1;
                    log::warn!("Embedding attempt {} failed, retrying in {:?}: {}", attempt, delay, err);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
