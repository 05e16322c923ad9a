//! Typed vertex records, labels and relations of the fraud graph.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{FraudGraphError, Result};

/// Value used for exact-match lookups on a vertex property.
pub type PropertyValue = serde_json::Value;

/// Partition key shared by every `Phone` vertex.
pub const PHONE_PARTITION: &str = "phone";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    Phone,
    UpiVpa,
    FraudEvent,
}

impl Label {
    pub const ALL: [Label; 3] = [Label::Phone, Label::UpiVpa, Label::FraudEvent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Phone => "Phone",
            Label::UpiVpa => "UpiVpa",
            Label::FraudEvent => "FraudEvent",
        }
    }

    /// Name of the natural-key property
    pub fn key_property(&self) -> &'static str {
        match self {
            Label::Phone => "number",
            Label::UpiVpa => "vpa",
            Label::FraudEvent => "event_id",
        }
    }

    /// Every property in the label's schema, natural key first
    pub fn property_names(&self) -> &'static [&'static str] {
        match self {
            Label::Phone => &["number", "state", "operator"],
            Label::UpiVpa => &["vpa", "category", "report_count", "status", "state", "estimated_victims"],
            Label::FraudEvent => &["event_id", "category", "confidence", "risk_level", "source", "sender"],
        }
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.property_names().contains(&property)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = FraudGraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Phone" => Ok(Label::Phone),
            "UpiVpa" => Ok(Label::UpiVpa),
            "FraudEvent" => Ok(Label::FraudEvent),
            other => Err(FraudGraphError::Query(format!("unknown vertex label: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Relation {
    /// Phone → UpiVpa: this phone operates this payment address
    #[serde(rename = "OPERATED_BY")]
    OperatedBy,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::OperatedBy => "OPERATED_BY",
        }
    }

    /// Labels allowed at the (tail, head) of the relation
    pub fn endpoints(&self) -> (Label, Label) {
        match self {
            Relation::OperatedBy => (Label::Phone, Label::UpiVpa),
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relation {
    type Err = FraudGraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "OPERATED_BY" => Ok(Relation::OperatedBy),
            other => Err(FraudGraphError::Query(format!("unknown relation: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Out,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    FakeCashback,
    DigitalArrest,
    KycFreeze,
    JobScam,
    LotteryScam,
    GovtImpersonation,
    PhishingLink,
    Legitimate,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::FakeCashback => "fake_cashback",
            Category::DigitalArrest => "digital_arrest",
            Category::KycFreeze => "kyc_freeze",
            Category::JobScam => "job_scam",
            Category::LotteryScam => "lottery_scam",
            Category::GovtImpersonation => "govt_impersonation",
            Category::PhishingLink => "phishing_link",
            Category::Legitimate => "legitimate",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpiStatus {
    Active,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Phone {
    pub number: String,
    pub state: String,
    pub operator: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpiVpa {
    pub vpa: String,
    pub category: Category,
    pub report_count: u32,
    pub status: UpiStatus,
    pub state: String,
    pub estimated_victims: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FraudEvent {
    pub event_id: String,
    pub category: Category,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub source: String,
    pub sender: String,
}

/// Identity of a vertex: label plus natural key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexKey {
    pub label: Label,
    pub key: String,
}

impl VertexKey {
    pub fn new(label: Label, key: impl Into<String>) -> Self {
        Self { label, key: key.into() }
    }

    pub fn phone(number: impl Into<String>) -> Self {
        Self::new(Label::Phone, number)
    }

    pub fn upi(vpa: impl Into<String>) -> Self {
        Self::new(Label::UpiVpa, vpa)
    }

    pub fn fraud_event(event_id: impl Into<String>) -> Self {
        Self::new(Label::FraudEvent, event_id)
    }
}

impl fmt::Display for VertexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label, self.key)
    }
}

/// A vertex with its full, typed property set
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "label", content = "properties")]
pub enum Vertex {
    Phone(Phone),
    UpiVpa(UpiVpa),
    FraudEvent(FraudEvent),
}

impl Vertex {
    pub fn label(&self) -> Label {
        match self {
            Vertex::Phone(_) => Label::Phone,
            Vertex::UpiVpa(_) => Label::UpiVpa,
            Vertex::FraudEvent(_) => Label::FraudEvent,
        }
    }

    pub fn natural_key(&self) -> &str {
        match self {
            Vertex::Phone(p) => &p.number,
            Vertex::UpiVpa(u) => &u.vpa,
            Vertex::FraudEvent(e) => &e.event_id,
        }
    }

    pub fn key(&self) -> VertexKey {
        VertexKey::new(self.label(), self.natural_key())
    }

    /// `UpiVpa` and `FraudEvent` are grouped by category, phones share one group
    pub fn partition_key(&self) -> &str {
        match self {
            Vertex::Phone(_) => PHONE_PARTITION,
            Vertex::UpiVpa(u) => u.category.as_str(),
            Vertex::FraudEvent(e) => e.category.as_str(),
        }
    }

    /// Check property ranges and identifier shapes before a write
    pub fn validate(&self) -> Result<()> {
        if self.natural_key().trim().is_empty() {
            return Err(FraudGraphError::Validation(format!(
                "{} natural key `{}` must not be empty",
                self.label(),
                self.label().key_property()
            )));
        }

        match self {
            Vertex::Phone(p) => {
                if !phone_pattern().is_match(&p.number) {
                    return Err(FraudGraphError::Validation(format!(
                        "phone number `{}` is not in +<country>-<digits> form",
                        p.number
                    )));
                }
            }
            Vertex::UpiVpa(u) => {
                if !vpa_pattern().is_match(&u.vpa) {
                    return Err(FraudGraphError::Validation(format!(
                        "payment address `{}` is not in <handle>@<provider> form",
                        u.vpa
                    )));
                }
            }
            Vertex::FraudEvent(e) => validate_confidence(e.confidence)?,
        }

        Ok(())
    }

    /// The full property bag as a JSON object
    pub fn properties(&self) -> Result<serde_json::Value> {
        let value = match self {
            Vertex::Phone(p) => serde_json::to_value(p),
            Vertex::UpiVpa(u) => serde_json::to_value(u),
            Vertex::FraudEvent(e) => serde_json::to_value(e),
        };
        value.map_err(|e| FraudGraphError::Query(format!("cannot encode {}: {}", self.key(), e)))
    }

    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        self.properties().ok()?.get(name).cloned()
    }

    /// Decode a stored property bag; a field outside the schema is an error
    pub fn decode(label: Label, properties_json: &str) -> Result<Self> {
        let decoded = match label {
            Label::Phone => serde_json::from_str(properties_json).map(Vertex::Phone),
            Label::UpiVpa => serde_json::from_str(properties_json).map(Vertex::UpiVpa),
            Label::FraudEvent => serde_json::from_str(properties_json).map(Vertex::FraudEvent),
        };
        decoded.map_err(|e| {
            FraudGraphError::Query(format!("stored {} does not match its schema: {}", label, e))
        })
    }

    pub fn as_phone(&self) -> Option<&Phone> {
        match self {
            Vertex::Phone(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_upi(&self) -> Option<&UpiVpa> {
        match self {
            Vertex::UpiVpa(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_fraud_event(&self) -> Option<&FraudEvent> {
        match self {
            Vertex::FraudEvent(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_phone(self) -> Option<Phone> {
        match self {
            Vertex::Phone(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_upi(self) -> Option<UpiVpa> {
        match self {
            Vertex::UpiVpa(u) => Some(u),
            _ => None,
        }
    }
}

impl From<Phone> for Vertex {
    fn from(p: Phone) -> Self {
        Vertex::Phone(p)
    }
}

impl From<UpiVpa> for Vertex {
    fn from(u: UpiVpa) -> Self {
        Vertex::UpiVpa(u)
    }
}

impl From<FraudEvent> for Vertex {
    fn from(e: FraudEvent) -> Self {
        Vertex::FraudEvent(e)
    }
}

/// Confidence must be a finite value in [0, 1]; it is never clamped.
pub fn validate_confidence(confidence: f64) -> Result<()> {
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(FraudGraphError::Validation(format!(
            "confidence {} is outside [0, 1]",
            confidence
        )));
    }
    Ok(())
}

/// Reject an edge whose endpoints do not carry the relation's labels
pub fn validate_edge(from: &VertexKey, to: &VertexKey, relation: Relation) -> Result<()> {
    let (tail, head) = relation.endpoints();
    if from.label != tail || to.label != head {
        return Err(FraudGraphError::Validation(format!(
            "{} must connect {} -> {}, got {} -> {}",
            relation, tail, head, from.label, to.label
        )));
    }
    Ok(())
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\+\d{1,3}-\d{6,14}$").expect("valid phone pattern"))
}

fn vpa_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]*@[A-Za-z][A-Za-z0-9]*$").expect("valid vpa pattern")
    })
}
