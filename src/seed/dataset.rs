use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FraudGraphError, Result};
use crate::graph::{Category, Phone, UpiStatus, UpiVpa, Vertex};

/// One OPERATED_BY link, by natural keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedLink {
    pub phone: String,
    pub vpa: String,
}

/// A known set of scam addresses, phones and the links between them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dataset {
    #[serde(default)]
    pub upis: Vec<UpiVpa>,
    #[serde(default)]
    pub phones: Vec<Phone>,
    #[serde(default)]
    pub links: Vec<SeedLink>,
}

// (vpa, category, report_count, status, state, estimated_victims)
const BASELINE_UPIS: [(&str, Category, u32, UpiStatus, &str, u32); 20] = [
    ("taskpay.earn@ybl", Category::JobScam, 27, UpiStatus::Active, "Maharashtra", 450),
    ("kbcprize2024@paytm", Category::LotteryScam, 23, UpiStatus::Active, "Uttar Pradesh", 380),
    ("sbikyc.update@ybl", Category::KycFreeze, 8, UpiStatus::Blocked, "Rajasthan", 120),
    ("cashback.official@okaxis", Category::FakeCashback, 31, UpiStatus::Active, "Delhi", 520),
    ("cbi.penalty@upi", Category::DigitalArrest, 12, UpiStatus::Active, "Tamil Nadu", 200),
    ("echallane.pay@ybl", Category::GovtImpersonation, 6, UpiStatus::Active, "Karnataka", 90),
    ("refund.process@paytm", Category::FakeCashback, 19, UpiStatus::Active, "Gujarat", 310),
    ("youtube.task@ybl", Category::JobScam, 27, UpiStatus::Active, "West Bengal", 440),
    ("jiodraw@paytm", Category::LotteryScam, 15, UpiStatus::Active, "Bihar", 250),
    ("loanfast@ybl", Category::JobScam, 9, UpiStatus::Active, "Telangana", 150),
    ("goldscheme@ybl", Category::FakeCashback, 11, UpiStatus::Active, "Madhya Pradesh", 180),
    ("customsduty@ybl", Category::GovtImpersonation, 14, UpiStatus::Active, "Punjab", 230),
    ("doubleincome@ybl", Category::FakeCashback, 21, UpiStatus::Active, "Haryana", 350),
    ("dream11winner@ybl", Category::LotteryScam, 17, UpiStatus::Active, "Andhra Pradesh", 280),
    ("meta-jobs@ybl", Category::JobScam, 7, UpiStatus::Active, "Kerala", 110),
    ("cybercell@ybl", Category::DigitalArrest, 18, UpiStatus::Active, "Delhi", 300),
    ("flipkart-prize@okaxis", Category::LotteryScam, 13, UpiStatus::Active, "Maharashtra", 210),
    ("taxsettlement@ybl", Category::GovtImpersonation, 10, UpiStatus::Active, "Uttar Pradesh", 165),
    ("bgv-check@ybl", Category::JobScam, 5, UpiStatus::Active, "Karnataka", 80),
    ("bescom-urgent@ybl", Category::GovtImpersonation, 8, UpiStatus::Active, "Karnataka", 130),
];

// (number, state, operator)
const BASELINE_PHONES: [(&str, &str, &str); 10] = [
    ("+91-9876500001", "Rajasthan", "Jio"),
    ("+91-9876500002", "Uttar Pradesh", "Airtel"),
    ("+91-9876500003", "Maharashtra", "Jio"),
    ("+91-9876500004", "Delhi", "BSNL"),
    ("+91-9876500005", "Tamil Nadu", "Vi"),
    ("+91-9330284713", "West Bengal", "Airtel"),
    ("+91-9223011112", "West Bengal", "Jio"),
    ("+91-9876500008", "Gujarat", "Airtel"),
    ("+91-9876500009", "Bihar", "Jio"),
    ("+91-9876500010", "Haryana", "Vi"),
];

// (phone index, upi index), 1-based like the ph/upi ids they came from
const BASELINE_LINKS: [(usize, usize); 17] = [
    (1, 1),
    (1, 8),
    (2, 2),
    (2, 9),
    (3, 4),
    (3, 7),
    (3, 13),
    (4, 5),
    (4, 16),
    (5, 3),
    (6, 6),
    (7, 12),
    (8, 11),
    (9, 17),
    (10, 10),
    (10, 15),
    (10, 19),
];

impl Dataset {
    /// The reference scam network: 20 addresses, 10 phones, 17 links.
    pub fn baseline() -> Self {
        let upis = BASELINE_UPIS
            .iter()
            .map(|&(vpa, category, report_count, status, state, estimated_victims)| UpiVpa {
                vpa: vpa.to_string(),
                category,
                report_count,
                status,
                state: state.to_string(),
                estimated_victims,
            })
            .collect();

        let phones = BASELINE_PHONES
            .iter()
            .map(|&(number, state, operator)| Phone {
                number: number.to_string(),
                state: state.to_string(),
                operator: operator.to_string(),
            })
            .collect();

        let links = BASELINE_LINKS
            .iter()
            .map(|&(phone, upi)| SeedLink {
                phone: BASELINE_PHONES[phone - 1].0.to_string(),
                vpa: BASELINE_UPIS[upi - 1].0.to_string(),
            })
            .collect();

        Self { upis, phones, links }
    }

    /// Load a dataset from a JSON file with `upis`, `phones` and `links` arrays
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            FraudGraphError::Parse(format!("invalid dataset {}: {}", path.display(), e))
        })
    }

    /// Every vertex in the dataset, addresses first
    pub fn vertices(&self) -> Vec<Vertex> {
        self.upis
            .iter()
            .cloned()
            .map(Vertex::UpiVpa)
            .chain(self.phones.iter().cloned().map(Vertex::Phone))
            .collect()
    }
}
