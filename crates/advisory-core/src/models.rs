//! Core data models shared by the advisory pipeline.
//!
//! These types represent conversation turns, retrieved knowledge-base
//! passages, business profiles, and the static opportunity and service
//! catalogs that flow through orchestration, retrieval, and assessment.
//!
//! JSON field names follow the chat client's wire format (camelCase for
//! request/response bodies, kebab-case for enumerated profile values).

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

// ============ Conversation ============

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => bail!("unknown message role '{}'", other),
        }
    }
}

/// A single message in a conversation, in the shape sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Discourse phase of a conversation, ordered by progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Discovery,
    Exploration,
    Solution,
    Implementation,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Discovery,
        Stage::Exploration,
        Stage::Solution,
        Stage::Implementation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Discovery => "discovery",
            Stage::Exploration => "exploration",
            Stage::Solution => "solution",
            Stage::Implementation => "implementation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-conversation record kept by the orchestrator between turns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub stage: Stage,
    pub token_count: usize,
    pub message_history: Vec<ConversationTurn>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            stage: Stage::Discovery,
            token_count: 0,
            message_history: Vec::new(),
        }
    }
}

// ============ Retrieval ============

/// Metadata attached to every knowledge-base chunk in the vector index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMetadata {
    #[serde(default)]
    pub industry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
}

/// A knowledge-base passage returned by a vector query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub content: String,
    pub score: f32,
    pub metadata: DocMetadata,
}

/// A chunk of a knowledge-base document prepared for embedding.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

// ============ Business profile ============

/// Priority industries served by the advisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Industry {
    Agriculture,
    CleanEnergy,
    Medical,
    EnablingCapabilities,
}

impl Industry {
    pub const ALL: [Industry; 4] = [
        Industry::Agriculture,
        Industry::CleanEnergy,
        Industry::Medical,
        Industry::EnablingCapabilities,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Industry::Agriculture => "agriculture",
            Industry::CleanEnergy => "clean-energy",
            Industry::Medical => "medical",
            Industry::EnablingCapabilities => "enabling-capabilities",
        }
    }
}

impl fmt::Display for Industry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Industry {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "agriculture" => Ok(Industry::Agriculture),
            "clean-energy" | "clean_energy" => Ok(Industry::CleanEnergy),
            "medical" | "healthcare" => Ok(Industry::Medical),
            "enabling-capabilities" | "enabling_capabilities" => {
                Ok(Industry::EnablingCapabilities)
            }
            other => bail!(
                "unknown industry '{}'. Must be agriculture, clean-energy, medical, or enabling-capabilities",
                other
            ),
        }
    }
}

/// Small: 1-19 employees. Medium: 20-199 employees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusinessSize {
    Small,
    Medium,
}

impl BusinessSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessSize::Small => "small",
            BusinessSize::Medium => "medium",
        }
    }

    pub fn employee_range(&self) -> &'static str {
        match self {
            BusinessSize::Small => "1-19",
            BusinessSize::Medium => "20-199",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DigitalMaturity {
    Basic,
    Developing,
    Advanced,
}

impl DigitalMaturity {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigitalMaturity::Basic => "basic",
            DigitalMaturity::Developing => "developing",
            DigitalMaturity::Advanced => "advanced",
        }
    }
}

/// Low: under $10k. Medium: $10k-$50k. High: over $50k.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Budget {
    Low,
    Medium,
    High,
}

impl Budget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Budget::Low => "low",
            Budget::Medium => "medium",
            Budget::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Timeline {
    Immediate,
    ShortTerm,
    LongTerm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TechnicalCapacity {
    None,
    Limited,
    Strong,
}

impl TechnicalCapacity {
    pub fn as_str(&self) -> &'static str {
        match self {
            TechnicalCapacity::None => "none",
            TechnicalCapacity::Limited => "limited",
            TechnicalCapacity::Strong => "strong",
        }
    }
}

/// Coarse low/medium/high rating used by catalog entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Low => "low",
            Level::Medium => "medium",
            Level::High => "high",
        }
    }
}

/// Structured description of a business submitted for assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessProfile {
    pub industry: Industry,
    pub size: BusinessSize,
    pub digital_maturity: DigitalMaturity,
    pub budget: Budget,
    #[serde(default)]
    pub timeline: Option<Timeline>,
    pub technical_capacity: TechnicalCapacity,
    #[serde(default)]
    pub current_pain_points: Vec<String>,
    #[serde(default)]
    pub business_goals: Vec<String>,
}

// ============ Opportunities ============

/// Static catalog entry describing one AI adoption opportunity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiOpportunity {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub industry: Industry,
    pub implementation_time: &'static str,
    pub required_investment: &'static str,
    pub technical_complexity: Level,
    pub business_impact: Level,
    pub prerequisites: &'static [&'static str],
    #[serde(rename = "potentialROI")]
    pub potential_roi: &'static str,
    pub eligible_services: &'static [&'static str],
}

/// Four-axis score of an opportunity against a profile, each in `[0, 5]`.
///
/// `complexity` and `cost` are penalties (lower is better).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpportunityScore {
    pub readiness: u8,
    pub impact: u8,
    pub complexity: u8,
    pub cost: u8,
    pub composite: f64,
}

/// A catalog opportunity decorated with its computed score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssessedOpportunity {
    #[serde(flatten)]
    pub opportunity: AiOpportunity,
    pub score: OpportunityScore,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

// ============ Services ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    Consultation,
    Course,
    Program,
    Product,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceCost {
    Free,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    Online,
    InPerson,
    Hybrid,
}

/// Hard eligibility gate for a service. `None` means unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_impact: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_readiness: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_complexity: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_sizes: Option<&'static [BusinessSize]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industries: Option<&'static [Industry]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digital_maturity_levels: Option<&'static [DigitalMaturity]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technical_capacity_levels: Option<&'static [TechnicalCapacity]>,
}

/// Static catalog entry for an advisory service on offer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "type")]
    pub kind: ServiceKind,
    pub category: &'static str,
    pub duration: Option<&'static str>,
    pub cost: ServiceCost,
    pub target_audience: &'static [&'static str],
    pub prerequisites: &'static [&'static str],
    pub delivery_mode: DeliveryMode,
    pub booking_url: Option<&'static str>,
    pub info_url: Option<&'static str>,
    pub eligibility: Eligibility,
    pub tags: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// A service matched to a profile, with a call to action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecommendation {
    pub service: Service,
    pub match_score: u32,
    pub rationale: String,
    pub priority: Priority,
    pub cta_text: &'static str,
    pub cta_url: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ordering_follows_progression() {
        assert!(Stage::Discovery < Stage::Exploration);
        assert!(Stage::Exploration < Stage::Solution);
        assert!(Stage::Solution < Stage::Implementation);
    }

    #[test]
    fn test_profile_deserializes_wire_format() {
        let json = r#"{
            "industry": "agriculture",
            "size": "small",
            "digitalMaturity": "developing",
            "budget": "medium",
            "technicalCapacity": "limited"
        }"#;
        let profile: BusinessProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.industry, Industry::Agriculture);
        assert_eq!(profile.digital_maturity, DigitalMaturity::Developing);
        assert!(profile.timeline.is_none());
        assert!(profile.business_goals.is_empty());
    }

    #[test]
    fn test_profile_rejects_unknown_industry() {
        let json = r#"{
            "industry": "mining",
            "size": "small",
            "digitalMaturity": "basic",
            "budget": "low",
            "technicalCapacity": "none"
        }"#;
        assert!(serde_json::from_str::<BusinessProfile>(json).is_err());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert!("moderator".parse::<Role>().is_err());
    }

    #[test]
    fn test_industry_parse_accepts_aliases() {
        assert_eq!("healthcare".parse::<Industry>().unwrap(), Industry::Medical);
        assert_eq!(
            "clean_energy".parse::<Industry>().unwrap(),
            Industry::CleanEnergy
        );
    }
}
