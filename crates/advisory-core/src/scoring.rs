//! Opportunity scoring against a business profile.
//!
//! Every catalog opportunity in the profile's industry is scored on four
//! axes, each clamped to `[0, 5]`:
//!
//! | Axis         | Direction     | Inputs                                         |
//! |--------------|---------------|------------------------------------------------|
//! | `readiness`  | higher better | digital maturity, technical capacity, complexity |
//! | `impact`     | higher better | business impact, size, goal alignment          |
//! | `complexity` | lower better  | technical complexity, technical capacity       |
//! | `cost`       | lower better  | investment range, budget                       |
//!
//! The composite is `0.4·impact + 0.3·readiness + 0.2·(5−cost) +
//! 0.1·(5−complexity)`, rounded to two decimals, so high-value and
//! ready-to-execute opportunities rank first.

use crate::models::{
    AiOpportunity, AssessedOpportunity, Budget, BusinessProfile, BusinessSize, DigitalMaturity,
    Industry, Level, OpportunityScore, TechnicalCapacity,
};

/// Number of opportunities returned by [`rank`].
pub const TOP_OPPORTUNITIES: usize = 5;

const MAX_AXIS: i32 = 5;

/// Goal keywords that count as aligned with any opportunity.
const ALIGNED_GOAL_KEYWORDS: [&str; 3] = ["efficiency", "cost", "quality"];

/// Investment substrings mapped to a cost tier, checked in order.
const COST_TIERS: [(&[&str], i32); 4] = [
    (&["80,000", "70,000"], 4),
    (&["60,000", "50,000"], 3),
    (&["40,000", "35,000"], 2),
    (&["25,000", "15,000"], 1),
];

static CATALOG: [AiOpportunity; 8] = [
    AiOpportunity {
        id: "ag-crop-monitoring",
        title: "AI-Powered Crop Monitoring",
        description: "Use satellite imagery and AI to monitor crop health, predict yields, and optimize irrigation",
        industry: Industry::Agriculture,
        implementation_time: "3-6 months",
        required_investment: "$15,000-$40,000",
        technical_complexity: Level::Medium,
        business_impact: Level::High,
        prerequisites: &["Internet connectivity", "Basic smartphone/tablet usage"],
        potential_roi: "20-35% yield improvement",
        eligible_services: &["AI Products & Consultations", "One-on-One Consultations"],
    },
    AiOpportunity {
        id: "ag-precision-farming",
        title: "Precision Farming with IoT Sensors",
        description: "Deploy soil sensors and weather stations with AI analytics for optimized farming decisions",
        industry: Industry::Agriculture,
        implementation_time: "2-4 months",
        required_investment: "$8,000-$25,000",
        technical_complexity: Level::Low,
        business_impact: Level::Medium,
        prerequisites: &["Field access for sensor installation"],
        potential_roi: "15-25% input cost reduction",
        eligible_services: &["Short Courses", "AI Products & Consultations"],
    },
    AiOpportunity {
        id: "ce-predictive-maintenance",
        title: "Predictive Maintenance for Energy Equipment",
        description: "AI-driven maintenance scheduling to prevent equipment failures and optimize uptime",
        industry: Industry::CleanEnergy,
        implementation_time: "4-8 months",
        required_investment: "$20,000-$60,000",
        technical_complexity: Level::High,
        business_impact: Level::High,
        prerequisites: &["Equipment sensors", "Historical maintenance data"],
        potential_roi: "25-40% maintenance cost reduction",
        eligible_services: &["AI Studio Program", "One-on-One Consultations"],
    },
    AiOpportunity {
        id: "ce-energy-forecasting",
        title: "AI Energy Demand Forecasting",
        description: "Predict energy consumption patterns to optimize grid operations and reduce costs",
        industry: Industry::CleanEnergy,
        implementation_time: "3-6 months",
        required_investment: "$12,000-$35,000",
        technical_complexity: Level::Medium,
        business_impact: Level::Medium,
        prerequisites: &["Historical energy usage data", "Smart meter integration"],
        potential_roi: "10-20% energy cost savings",
        eligible_services: &["AI Products & Consultations", "Short Courses"],
    },
    AiOpportunity {
        id: "med-diagnostic-assistance",
        title: "AI Diagnostic Assistance",
        description: "AI-powered tools to assist with medical image analysis and diagnostic decisions",
        industry: Industry::Medical,
        implementation_time: "6-12 months",
        required_investment: "$30,000-$80,000",
        technical_complexity: Level::High,
        business_impact: Level::High,
        prerequisites: &["Medical imaging equipment", "Regulatory compliance"],
        potential_roi: "30-50% diagnostic accuracy improvement",
        eligible_services: &["AI Studio Program", "One-on-One Consultations"],
    },
    AiOpportunity {
        id: "med-patient-flow",
        title: "Patient Flow Optimization",
        description: "AI scheduling and resource allocation to reduce wait times and improve patient experience",
        industry: Industry::Medical,
        implementation_time: "2-4 months",
        required_investment: "$5,000-$15,000",
        technical_complexity: Level::Low,
        business_impact: Level::Medium,
        prerequisites: &["Patient management system", "Historical appointment data"],
        potential_roi: "20-30% efficiency improvement",
        eligible_services: &["AI Products & Consultations", "Short Courses"],
    },
    AiOpportunity {
        id: "ec-quality-control",
        title: "AI-Powered Quality Control",
        description: "Computer vision systems for automated defect detection and quality assurance",
        industry: Industry::EnablingCapabilities,
        implementation_time: "4-8 months",
        required_investment: "$25,000-$70,000",
        technical_complexity: Level::High,
        business_impact: Level::High,
        prerequisites: &["Manufacturing equipment", "Camera systems"],
        potential_roi: "40-60% defect reduction",
        eligible_services: &["AI Studio Program", "One-on-One Consultations"],
    },
    AiOpportunity {
        id: "ec-process-automation",
        title: "Process Automation with AI",
        description: "Automate repetitive tasks and workflows using AI-powered tools",
        industry: Industry::EnablingCapabilities,
        implementation_time: "1-3 months",
        required_investment: "$3,000-$12,000",
        technical_complexity: Level::Low,
        business_impact: Level::Medium,
        prerequisites: &["Digital workflow systems"],
        potential_roi: "25-40% time savings",
        eligible_services: &["Short Courses", "AI Products & Consultations"],
    },
];

// ============ Catalog lookups ============

pub fn all_opportunities() -> &'static [AiOpportunity] {
    &CATALOG
}

pub fn opportunity_by_id(id: &str) -> Option<&'static AiOpportunity> {
    CATALOG.iter().find(|op| op.id == id)
}

pub fn opportunities_by_industry(industry: Industry) -> impl Iterator<Item = &'static AiOpportunity> {
    CATALOG.iter().filter(move |op| op.industry == industry)
}

// ============ Scoring ============

fn clamp_axis(value: i32) -> u8 {
    value.clamp(0, MAX_AXIS) as u8
}

fn readiness(op: &AiOpportunity, profile: &BusinessProfile) -> u8 {
    let mut score = 0;
    score += match profile.digital_maturity {
        DigitalMaturity::Advanced => 2,
        DigitalMaturity::Developing => 1,
        DigitalMaturity::Basic => 0,
    };
    score += match profile.technical_capacity {
        TechnicalCapacity::Strong => 2,
        TechnicalCapacity::Limited => 1,
        TechnicalCapacity::None => 0,
    };
    score += match op.technical_complexity {
        Level::Low => 1,
        Level::Medium => 0,
        Level::High => -1,
    };
    clamp_axis(score)
}

fn goals_align(op: &AiOpportunity, profile: &BusinessProfile) -> bool {
    let description = op.description.to_lowercase();
    profile.business_goals.iter().any(|goal| {
        let goal = goal.to_lowercase();
        description.contains(&goal) || ALIGNED_GOAL_KEYWORDS.iter().any(|k| goal.contains(k))
    })
}

fn impact(op: &AiOpportunity, profile: &BusinessProfile) -> u8 {
    let mut score = match op.business_impact {
        Level::High => 3,
        Level::Medium => 2,
        Level::Low => 1,
    };
    if profile.size == BusinessSize::Medium {
        score += 1;
    }
    if goals_align(op, profile) {
        score += 1;
    }
    clamp_axis(score)
}

fn complexity(op: &AiOpportunity, profile: &BusinessProfile) -> u8 {
    let mut score = match op.technical_complexity {
        Level::High => 3,
        Level::Medium => 2,
        Level::Low => 1,
    };
    score += match profile.technical_capacity {
        TechnicalCapacity::Strong => -1,
        TechnicalCapacity::Limited => 0,
        TechnicalCapacity::None => 1,
    };
    clamp_axis(score)
}

/// Tier of an investment range string, matched on literal dollar figures.
pub fn investment_tier(required_investment: &str) -> i32 {
    let investment = required_investment.to_lowercase();
    COST_TIERS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| investment.contains(n)))
        .map(|(_, tier)| *tier)
        .unwrap_or(0)
}

fn cost(op: &AiOpportunity, profile: &BusinessProfile) -> u8 {
    let mut score = investment_tier(op.required_investment);
    score += match profile.budget {
        Budget::High => -1,
        Budget::Medium => 0,
        Budget::Low => 1,
    };
    clamp_axis(score)
}

/// Weighted composite of the four axes, rounded to two decimals.
pub fn composite(readiness: u8, impact: u8, complexity: u8, cost: u8) -> f64 {
    let raw = f64::from(impact) * 0.4
        + f64::from(readiness) * 0.3
        + (5.0 - f64::from(cost)) * 0.2
        + (5.0 - f64::from(complexity)) * 0.1;
    (raw * 100.0).round() / 100.0
}

/// Score a single opportunity against a profile.
pub fn score_opportunity(op: &AiOpportunity, profile: &BusinessProfile) -> OpportunityScore {
    let readiness = readiness(op, profile);
    let impact = impact(op, profile);
    let complexity = complexity(op, profile);
    let cost = cost(op, profile);
    OpportunityScore {
        readiness,
        impact,
        complexity,
        cost,
        composite: composite(readiness, impact, complexity, cost),
    }
}

/// Score every opportunity in the profile's industry and return the top
/// [`TOP_OPPORTUNITIES`] by composite, highest first. Rationales are left
/// empty for the caller to fill.
pub fn rank(profile: &BusinessProfile) -> Vec<AssessedOpportunity> {
    let mut scored: Vec<AssessedOpportunity> = opportunities_by_industry(profile.industry)
        .map(|op| AssessedOpportunity {
            opportunity: op.clone(),
            score: score_opportunity(op, profile),
            rationale: None,
        })
        .collect();
    scored.sort_by(|a, b| b.score.composite.total_cmp(&a.score.composite));
    scored.truncate(TOP_OPPORTUNITIES);
    scored
}

// ============ Rationale ============

/// Suitability phrase used when asking the model for a rationale.
pub fn suitability(score: &OpportunityScore) -> &'static str {
    if score.composite >= 3.5 {
        "highly recommended"
    } else if score.composite >= 2.5 {
        "moderately suitable"
    } else {
        "challenging"
    }
}

/// Prompt for a two-to-three sentence rationale of one scored opportunity.
pub fn rationale_prompt(
    op: &AiOpportunity,
    profile: &BusinessProfile,
    score: &OpportunityScore,
) -> String {
    format!(
        "Explain why this AI opportunity is {suitability} for this business:

Business Context:
- Industry: {industry}
- Size: {size} ({employees} employees)
- Digital Maturity: {maturity}
- Budget: {budget}
- Technical Capacity: {capacity}
- Current Pain Points: {pain_points}

AI Opportunity:
- {title}: {description}
- Investment: {investment}
- Complexity: {complexity}
- Implementation Time: {time}

Scores:
- Readiness: {readiness}/5
- Impact: {impact}/5
- Complexity: {complexity_score}/5 (lower is better)
- Cost: {cost}/5 (lower is better)
- Overall: {composite}/5

Provide a concise 2-3 sentence rationale focusing on the key factors.",
        suitability = suitability(score),
        industry = profile.industry,
        size = profile.size.as_str(),
        employees = profile.size.employee_range(),
        maturity = profile.digital_maturity.as_str(),
        budget = profile.budget.as_str(),
        capacity = profile.technical_capacity.as_str(),
        pain_points = profile.current_pain_points.join(", "),
        title = op.title,
        description = op.description,
        investment = op.required_investment,
        complexity = op.technical_complexity.as_str(),
        time = op.implementation_time,
        readiness = score.readiness,
        impact = score.impact,
        complexity_score = score.complexity,
        cost = score.cost,
        composite = score.composite,
    )
}

/// Templated rationale used when the model call fails.
pub fn fallback_rationale(score: &OpportunityScore) -> String {
    format!(
        "Score: {}/5. This opportunity shows {} potential impact with {} readiness for your business context.",
        score.composite,
        if score.impact >= 3 { "high" } else { "moderate" },
        if score.readiness >= 3 { "good" } else { "limited" },
    )
}
