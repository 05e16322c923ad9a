use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{FraudGraphError, Result};
use crate::graph::model::{validate_confidence, Category, FraudEvent, RiskLevel};

const UNKNOWN: &str = "unknown";

fn unknown() -> String {
    UNKNOWN.to_string()
}

/// A classification result as carried on the event channel.
///
/// Producers forward the whole classifier reply, so fields outside this
/// record are accepted and ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub category: Category,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    #[serde(default = "unknown")]
    pub source: String,
    #[serde(default = "unknown")]
    pub sender: String,
    /// Original message text; only used to derive a stable id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ClassificationEvent {
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| FraudGraphError::Parse(format!("malformed classification event: {}", e)))
    }

    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The producer's id, or a content hash when none was supplied
    pub fn event_id(&self) -> String {
        match self.event_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.derived_event_id(),
        }
    }

    /// Hash of the immutable fields; a redelivered copy hashes the same.
    pub fn derived_event_id(&self) -> String {
        let confidence = self.confidence.to_string();
        let mut hasher = Sha256::new();
        for field in [
            self.category.as_str(),
            confidence.as_str(),
            self.risk_level.as_str(),
            self.source.as_str(),
            self.sender.as_str(),
            self.message.as_deref().unwrap_or(""),
        ] {
            hasher.update(field.as_bytes());
            hasher.update([0x1f]);
        }
        let digest = format!("{:x}", hasher.finalize());
        format!("evt_{}", &digest[..32])
    }

    /// Validate and convert into the vertex record that gets upserted
    pub fn into_fraud_event(self) -> Result<FraudEvent> {
        validate_confidence(self.confidence)?;
        Ok(FraudEvent {
            event_id: self.event_id(),
            category: self.category,
            confidence: self.confidence,
            risk_level: self.risk_level,
            source: self.source,
            sender: self.sender,
        })
    }
}
