use serde::{Deserialize, Serialize};

/// Coarse visa grouping used for display and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisaCategory {
    BusinessTourism,
    Student,
    SkilledWorker,
    IntracompanyTransfer,
    ExtraordinaryAbility,
    ExchangeVisitor,
    H4Dependent,
    Other,
}

/// Static token table. Tokens are compared after [`normalize_visa_token`].
const CATEGORY_TABLE: &[(&str, VisaCategory)] = &[
    ("B1", VisaCategory::BusinessTourism),
    ("B2", VisaCategory::BusinessTourism),
    ("B1/B2", VisaCategory::BusinessTourism),
    ("F1", VisaCategory::Student),
    ("H1B", VisaCategory::SkilledWorker),
    ("L1", VisaCategory::IntracompanyTransfer),
    ("O1", VisaCategory::ExtraordinaryAbility),
    ("J1", VisaCategory::ExchangeVisitor),
    ("H4", VisaCategory::H4Dependent),
];

impl VisaCategory {
    pub const ALL: [VisaCategory; 8] = [
        VisaCategory::BusinessTourism,
        VisaCategory::Student,
        VisaCategory::SkilledWorker,
        VisaCategory::IntracompanyTransfer,
        VisaCategory::ExtraordinaryAbility,
        VisaCategory::ExchangeVisitor,
        VisaCategory::H4Dependent,
        VisaCategory::Other,
    ];

    /// Look up the category of a visa-type token.
    ///
    /// The token is normalized first, so `"h-1b"` and `"H1B (Dropbox)"`
    /// both resolve to [`VisaCategory::SkilledWorker`]. Unknown tokens
    /// fall through to [`VisaCategory::Other`].
    pub fn from_token(token: &str) -> Self {
        let token = normalize_visa_token(token);
        CATEGORY_TABLE
            .iter()
            .find(|(known, _)| *known == token)
            .map(|(_, category)| *category)
            .unwrap_or(VisaCategory::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VisaCategory::BusinessTourism => "business_tourism",
            VisaCategory::Student => "student",
            VisaCategory::SkilledWorker => "skilled_worker",
            VisaCategory::IntracompanyTransfer => "intracompany_transfer",
            VisaCategory::ExtraordinaryAbility => "extraordinary_ability",
            VisaCategory::ExchangeVisitor => "exchange_visitor",
            VisaCategory::H4Dependent => "h4_dependent",
            VisaCategory::Other => "other",
        }
    }

    /// Human-readable label shown on the dashboard and in emails
    pub fn display_name(&self) -> &'static str {
        match self {
            VisaCategory::BusinessTourism => "Business/Tourism",
            VisaCategory::Student => "Student",
            VisaCategory::SkilledWorker => "Skilled Worker",
            VisaCategory::IntracompanyTransfer => "Intracompany Transfer",
            VisaCategory::ExtraordinaryAbility => "Extraordinary Ability",
            VisaCategory::ExchangeVisitor => "Exchange Visitor",
            VisaCategory::H4Dependent => "H4 Dependent",
            VisaCategory::Other => "Other",
        }
    }
}

impl std::fmt::Display for VisaCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl std::str::FromStr for VisaCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VisaCategory::ALL
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s) || c.display_name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Unknown visa category: {}", s))
    }
}

/// Availability bucket derived from the number of open dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityTier {
    High,
    Medium,
    Low,
}

impl AvailabilityTier {
    /// Slot counts above this are `High`
    pub const HIGH_THRESHOLD: u32 = 10;

    pub fn from_slot_count(slot_count: u32) -> Self {
        match slot_count {
            0 => AvailabilityTier::Low,
            1..=Self::HIGH_THRESHOLD => AvailabilityTier::Medium,
            _ => AvailabilityTier::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityTier::High => "high",
            AvailabilityTier::Medium => "medium",
            AvailabilityTier::Low => "low",
        }
    }
}

impl std::fmt::Display for AvailabilityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Appointment queue named in the parenthesised part of a source label,
/// e.g. `"B1 (Dropbox)"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisaSubtype {
    Regular,
    Dropbox,
    Emergency,
    Blanket,
    Other,
}

impl VisaSubtype {
    fn from_suffix(suffix: &str) -> Self {
        match suffix.trim().to_ascii_lowercase().as_str() {
            "regular" => VisaSubtype::Regular,
            "dropbox" => VisaSubtype::Dropbox,
            "emergency" => VisaSubtype::Emergency,
            "blanket" => VisaSubtype::Blanket,
            _ => VisaSubtype::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VisaSubtype::Regular => "Regular",
            VisaSubtype::Dropbox => "Dropbox",
            VisaSubtype::Emergency => "Emergency",
            VisaSubtype::Blanket => "Blanket",
            VisaSubtype::Other => "Other",
        }
    }
}

impl std::fmt::Display for VisaSubtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reduce a visa label to its bare token: drop any parenthesised suffix,
/// upper-case, and strip hyphens and whitespace (`"h-1b (Dropbox)"` → `"H1B"`).
pub fn normalize_visa_token(raw: &str) -> String {
    let base = raw.split('(').next().unwrap_or_default();
    base.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_uppercase)
        .collect()
}

/// Split a label like `"B1 (Dropbox)"` into its token and subtype.
///
/// The subtype is `None` when the label has no parenthesised part.
pub fn split_visa_label(label: &str) -> (String, Option<VisaSubtype>) {
    let token = normalize_visa_token(label);
    let subtype = label
        .split_once('(')
        .map(|(_, rest)| VisaSubtype::from_suffix(rest.trim_end().trim_end_matches(')')));
    (token, subtype)
}

/// Canonical form of a consulate location: trimmed, upper-case, single spaces.
pub fn normalize_location(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}
