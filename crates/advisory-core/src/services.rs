//! Service recommendation matching.
//!
//! Matches a business profile, and optionally the scores of its top
//! assessed opportunity, against the fixed service catalog.
//!
//! Eligibility is a hard gate: an ineligible service scores 0 and is
//! dropped. Eligible services start at 50 points and accrue:
//!
//! | Signal                                             | Points |
//! |----------------------------------------------------|--------|
//! | digital maturity advanced / developing / basic     | 15 / 10 / 5 |
//! | technical capacity strong / limited / none         | 15 / 10 / 5 |
//! | program, readiness ≥ 3 and impact ≥ 4              | 20     |
//! | consultation, readiness < 3                        | 15     |
//! | course, basic maturity (with scores)               | 15     |
//! | product, readiness ≥ 3                             | 10     |
//! | industry workshop                                  | 10     |
//! | low budget, free service                           | 5      |
//!
//! Scores cap at 100. Priority is `high` at 80+, `medium` at 60+.

use crate::models::{
    Budget, BusinessProfile, BusinessSize, DeliveryMode, DigitalMaturity, Eligibility, Industry,
    OpportunityScore, Priority, Service, ServiceCost, ServiceKind, ServiceRecommendation,
    TechnicalCapacity,
};

/// Number of recommendations returned by [`recommend`].
pub const TOP_SERVICES: usize = 5;

const MAX_MATCH_SCORE: u32 = 100;
const WORKSHOP_ID: &str = "industry-specific-workshop";

const SMALL_AND_MEDIUM: &[BusinessSize] = &[BusinessSize::Small, BusinessSize::Medium];

static CATALOG: [Service; 7] = [
    Service {
        id: "ai-studio-program",
        name: "AI Studio Program",
        description: "8-week intensive program for custom AI solution development with dedicated support",
        kind: ServiceKind::Program,
        category: "Custom Development",
        duration: Some("8 weeks"),
        cost: ServiceCost::Free,
        target_audience: &["SMEs ready for custom AI development", "Businesses with clear AI use cases"],
        prerequisites: &["Dedicated team member", "Clear business objectives", "Technical readiness"],
        delivery_mode: DeliveryMode::Hybrid,
        booking_url: Some("https://smec.ai/programs/ai-studio/apply"),
        info_url: Some("https://smec.ai/programs/ai-studio"),
        eligibility: Eligibility {
            min_impact: Some(4),
            min_readiness: Some(3),
            max_complexity: None,
            business_sizes: Some(SMALL_AND_MEDIUM),
            industries: None,
            digital_maturity_levels: Some(&[DigitalMaturity::Developing, DigitalMaturity::Advanced]),
            technical_capacity_levels: Some(&[TechnicalCapacity::Limited, TechnicalCapacity::Strong]),
        },
        tags: &["custom-development", "intensive", "high-impact", "mentorship"],
    },
    Service {
        id: "one-on-one-consultation",
        name: "One-on-One AI Consultation",
        description: "Personalized guidance session with AI experts to assess your specific needs",
        kind: ServiceKind::Consultation,
        category: "Assessment & Planning",
        duration: Some("60-90 minutes"),
        cost: ServiceCost::Free,
        target_audience: &["All SMEs exploring AI", "Businesses needing strategic guidance"],
        prerequisites: &["Basic business overview prepared"],
        delivery_mode: DeliveryMode::Online,
        booking_url: Some("https://smec.ai/consultations/book"),
        info_url: Some("https://smec.ai/consultations"),
        eligibility: Eligibility {
            min_impact: None,
            min_readiness: None,
            max_complexity: None,
            business_sizes: Some(SMALL_AND_MEDIUM),
            industries: Some(&Industry::ALL),
            digital_maturity_levels: None,
            technical_capacity_levels: None,
        },
        tags: &["consultation", "assessment", "strategic", "personalized"],
    },
    Service {
        id: "ai-fundamentals-course",
        name: "AI Fundamentals for SMEs",
        description: "Comprehensive course covering AI basics, business applications, and implementation strategies",
        kind: ServiceKind::Course,
        category: "Education & Training",
        duration: Some("4 weeks"),
        cost: ServiceCost::Free,
        target_audience: &["Business owners", "Managers", "Team leaders"],
        prerequisites: &["No technical background required"],
        delivery_mode: DeliveryMode::Online,
        booking_url: Some("https://smec.ai/courses/fundamentals/enroll"),
        info_url: Some("https://smec.ai/courses/fundamentals"),
        eligibility: Eligibility {
            min_impact: None,
            min_readiness: None,
            max_complexity: None,
            business_sizes: Some(SMALL_AND_MEDIUM),
            industries: None,
            digital_maturity_levels: Some(&[
                DigitalMaturity::Basic,
                DigitalMaturity::Developing,
                DigitalMaturity::Advanced,
            ]),
            technical_capacity_levels: None,
        },
        tags: &["education", "fundamentals", "business-focused", "self-paced"],
    },
    Service {
        id: WORKSHOP_ID,
        name: "Industry-Specific AI Workshop",
        description: "Targeted workshops focusing on AI applications in your specific industry sector",
        kind: ServiceKind::Course,
        category: "Industry Training",
        duration: Some("1-2 days"),
        cost: ServiceCost::Free,
        target_audience: &["Industry professionals", "Sector-specific teams"],
        prerequisites: &["Industry experience helpful"],
        delivery_mode: DeliveryMode::Hybrid,
        booking_url: Some("https://smec.ai/workshops/industry/book"),
        info_url: Some("https://smec.ai/workshops/industry"),
        eligibility: Eligibility {
            min_impact: None,
            min_readiness: None,
            max_complexity: None,
            business_sizes: Some(SMALL_AND_MEDIUM),
            industries: Some(&Industry::ALL),
            digital_maturity_levels: Some(&[DigitalMaturity::Developing, DigitalMaturity::Advanced]),
            technical_capacity_levels: None,
        },
        tags: &["workshop", "industry-specific", "practical", "networking"],
    },
    Service {
        id: "ai-products-directory",
        name: "AI Products & Solutions Directory",
        description: "Curated marketplace of vetted AI solutions ready for SME implementation",
        kind: ServiceKind::Product,
        category: "Solution Discovery",
        duration: None,
        cost: ServiceCost::Free,
        target_audience: &["SMEs ready to implement", "Businesses seeking immediate solutions"],
        prerequisites: &["Clear budget and timeline"],
        delivery_mode: DeliveryMode::Online,
        booking_url: None,
        info_url: Some("https://smec.ai/products"),
        eligibility: Eligibility {
            min_impact: None,
            min_readiness: Some(2),
            max_complexity: None,
            business_sizes: Some(SMALL_AND_MEDIUM),
            industries: None,
            digital_maturity_levels: Some(&[DigitalMaturity::Developing, DigitalMaturity::Advanced]),
            technical_capacity_levels: None,
        },
        tags: &["marketplace", "ready-solutions", "vetted", "implementation"],
    },
    Service {
        id: "technical-readiness-assessment",
        name: "Technical Readiness Assessment",
        description: "Comprehensive evaluation of your technical infrastructure and AI readiness",
        kind: ServiceKind::Consultation,
        category: "Technical Assessment",
        duration: Some("2-3 hours"),
        cost: ServiceCost::Free,
        target_audience: &["SMEs with technical questions", "Businesses planning implementation"],
        prerequisites: &["Access to current systems documentation"],
        delivery_mode: DeliveryMode::Online,
        booking_url: Some("https://smec.ai/assessments/technical/book"),
        info_url: Some("https://smec.ai/assessments/technical"),
        eligibility: Eligibility {
            min_impact: None,
            min_readiness: None,
            max_complexity: None,
            business_sizes: Some(SMALL_AND_MEDIUM),
            industries: None,
            digital_maturity_levels: Some(&[DigitalMaturity::Basic, DigitalMaturity::Developing]),
            technical_capacity_levels: Some(&[TechnicalCapacity::None, TechnicalCapacity::Limited]),
        },
        tags: &["assessment", "technical", "infrastructure", "readiness"],
    },
    Service {
        id: "grant-funding-guidance",
        name: "Grant & Funding Guidance",
        description: "Support in identifying and applying for AI implementation grants and funding opportunities",
        kind: ServiceKind::Consultation,
        category: "Financial Support",
        duration: Some("45 minutes"),
        cost: ServiceCost::Free,
        target_audience: &["SMEs seeking funding", "Businesses with budget constraints"],
        prerequisites: &["Business plan or project outline"],
        delivery_mode: DeliveryMode::Online,
        booking_url: Some("https://smec.ai/funding/guidance/book"),
        info_url: Some("https://smec.ai/funding/guidance"),
        eligibility: Eligibility {
            min_impact: Some(3),
            min_readiness: None,
            max_complexity: None,
            business_sizes: Some(SMALL_AND_MEDIUM),
            industries: None,
            digital_maturity_levels: None,
            technical_capacity_levels: None,
        },
        tags: &["funding", "grants", "financial", "support"],
    },
];

// ============ Catalog lookups ============

pub fn all_services() -> &'static [Service] {
    &CATALOG
}

pub fn service_by_id(id: &str) -> Option<&'static Service> {
    CATALOG.iter().find(|s| s.id == id)
}

pub fn services_by_kind(kind: ServiceKind) -> impl Iterator<Item = &'static Service> {
    CATALOG.iter().filter(move |s| s.kind == kind)
}

pub fn services_by_category<'a>(category: &'a str) -> impl Iterator<Item = &'static Service> + 'a {
    CATALOG.iter().filter(move |s| s.category == category)
}

// ============ Matching ============

fn allowed<T: PartialEq>(allowed: Option<&[T]>, value: &T) -> bool {
    allowed.map_or(true, |list| list.contains(value))
}

/// Hard eligibility gate. Score thresholds only apply when scores exist.
pub fn is_eligible(
    service: &Service,
    profile: &BusinessProfile,
    scores: Option<&OpportunityScore>,
) -> bool {
    let criteria = &service.eligibility;
    if !allowed(criteria.business_sizes, &profile.size)
        || !allowed(criteria.industries, &profile.industry)
        || !allowed(criteria.digital_maturity_levels, &profile.digital_maturity)
        || !allowed(criteria.technical_capacity_levels, &profile.technical_capacity)
    {
        return false;
    }

    if let Some(scores) = scores {
        if criteria.min_impact.is_some_and(|min| scores.impact < min)
            || criteria.min_readiness.is_some_and(|min| scores.readiness < min)
            || criteria.max_complexity.is_some_and(|max| scores.complexity > max)
        {
            return false;
        }
    }

    true
}

/// Points for a service, or 0 when the service is ineligible.
pub fn match_score(
    service: &Service,
    profile: &BusinessProfile,
    scores: Option<&OpportunityScore>,
) -> u32 {
    if !is_eligible(service, profile, scores) {
        return 0;
    }

    let mut score = 50;

    score += match profile.digital_maturity {
        DigitalMaturity::Advanced => 15,
        DigitalMaturity::Developing => 10,
        DigitalMaturity::Basic => 5,
    };
    score += match profile.technical_capacity {
        TechnicalCapacity::Strong => 15,
        TechnicalCapacity::Limited => 10,
        TechnicalCapacity::None => 5,
    };

    if let Some(scores) = scores {
        score += match service.kind {
            ServiceKind::Program if scores.readiness >= 3 && scores.impact >= 4 => 20,
            ServiceKind::Consultation if scores.readiness < 3 => 15,
            ServiceKind::Course if profile.digital_maturity == DigitalMaturity::Basic => 15,
            ServiceKind::Product if scores.readiness >= 3 => 10,
            _ => 0,
        };
    }

    if service.id == WORKSHOP_ID {
        score += 10;
    }

    if profile.budget == Budget::Low && service.cost == ServiceCost::Free {
        score += 5;
    }

    score.min(MAX_MATCH_SCORE)
}

pub fn priority_for(match_score: u32) -> Priority {
    if match_score >= 80 {
        Priority::High
    } else if match_score >= 60 {
        Priority::Medium
    } else {
        Priority::Low
    }
}

fn rationale(
    service: &Service,
    profile: &BusinessProfile,
    match_score: u32,
    has_opportunity: bool,
) -> String {
    let mut reasons = vec![match priority_for(match_score) {
        Priority::High => "Highly recommended based on your profile",
        Priority::Medium => "Good fit for your current needs",
        Priority::Low => "Suitable option to consider",
    }];
    if service.kind == ServiceKind::Program && has_opportunity {
        reasons.push("ideal for developing custom AI solutions");
    }
    if service.kind == ServiceKind::Consultation {
        reasons.push("provides personalized guidance for your situation");
    }
    if service.kind == ServiceKind::Course && profile.digital_maturity == DigitalMaturity::Basic {
        reasons.push("builds foundational AI knowledge");
    }
    if service.cost == ServiceCost::Free {
        reasons.push("fully funded by Australian Government");
    }
    reasons.join(", ")
}

/// Call-to-action label and link for a service.
pub fn call_to_action(service: &Service) -> (&'static str, &'static str) {
    let booking_or_info = service.booking_url.or(service.info_url).unwrap_or("#");
    match service.kind {
        ServiceKind::Program => ("Apply for AI Studio Program", booking_or_info),
        ServiceKind::Consultation => ("Book Your Free Consultation", booking_or_info),
        ServiceKind::Course => ("Enroll in Course", booking_or_info),
        ServiceKind::Product => ("Explore AI Solutions", service.info_url.unwrap_or("#")),
    }
}

/// Recommend up to [`TOP_SERVICES`] services, highest match first.
///
/// `top_scores` are the scores of the best assessed opportunity, when an
/// assessment has been run.
pub fn recommend(
    profile: &BusinessProfile,
    top_scores: Option<&OpportunityScore>,
) -> Vec<ServiceRecommendation> {
    let mut recommendations: Vec<ServiceRecommendation> = CATALOG
        .iter()
        .filter_map(|service| {
            let score = match_score(service, profile, top_scores);
            if score == 0 {
                return None;
            }
            let (cta_text, cta_url) = call_to_action(service);
            Some(ServiceRecommendation {
                service: service.clone(),
                match_score: score,
                rationale: rationale(service, profile, score, top_scores.is_some()),
                priority: priority_for(score),
                cta_text,
                cta_url,
            })
        })
        .collect();

    // Stable sort keeps catalog order among equal scores.
    recommendations.sort_by(|a, b| b.match_score.cmp(&a.match_score));
    recommendations.truncate(TOP_SERVICES);
    recommendations
}
