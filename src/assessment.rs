//! Opportunity assessment and service recommendation.
//!
//! Scoring is pure (see `advisory_core::scoring`); this module adds the
//! model-written rationale for each ranked opportunity and bundles the
//! service recommendations derived from the top score. Rationale calls
//! run concurrently and never fail the assessment: a failed call falls
//! back to a templated sentence.

use std::sync::Arc;

use advisory_core::models::{
    AssessedOpportunity, BusinessProfile, ConversationTurn, ServiceRecommendation,
};
use advisory_core::scoring::{fallback_rationale, rank, rationale_prompt};
use advisory_core::services::recommend;
use futures_util::future::join_all;
use serde::Serialize;
use tracing::warn;

use crate::llm::{ChatProvider, CompletionOptions};

const RATIONALE_SYSTEM: &str =
    "You are an AI business consultant. Provide clear, actionable insights.";
const RATIONALE_UNAVAILABLE: &str = "Assessment rationale unavailable.";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentReport {
    pub profile: BusinessProfile,
    pub opportunities: Vec<AssessedOpportunity>,
    pub recommendations: Vec<ServiceRecommendation>,
}

pub struct Assessor {
    chat: Arc<dyn ChatProvider>,
    options: CompletionOptions,
}

impl Assessor {
    pub fn new(chat: Arc<dyn ChatProvider>, rationale_model: &str) -> Self {
        Self {
            chat,
            options: CompletionOptions::new(rationale_model, 0.3, 150),
        }
    }

    /// Rank opportunities for `profile` and recommend services.
    ///
    /// With `with_rationale = false` no model calls are made.
    pub async fn assess(&self, profile: &BusinessProfile, with_rationale: bool) -> AssessmentReport {
        let mut opportunities = rank(profile);

        if with_rationale {
            let rationales = join_all(
                opportunities
                    .iter()
                    .map(|assessed| self.rationale(profile, assessed)),
            )
            .await;
            for (assessed, rationale) in opportunities.iter_mut().zip(rationales) {
                assessed.rationale = Some(rationale);
            }
        }

        let recommendations = recommend(profile, opportunities.first().map(|o| &o.score));

        AssessmentReport {
            profile: profile.clone(),
            opportunities,
            recommendations,
        }
    }

    /// Recommendations only; scores the profile to find the top opportunity.
    pub fn recommend(&self, profile: &BusinessProfile) -> Vec<ServiceRecommendation> {
        let ranked = rank(profile);
        recommend(profile, ranked.first().map(|o| &o.score))
    }

    async fn rationale(&self, profile: &BusinessProfile, assessed: &AssessedOpportunity) -> String {
        let messages = [
            ConversationTurn::system(RATIONALE_SYSTEM),
            ConversationTurn::user(rationale_prompt(
                &assessed.opportunity,
                profile,
                &assessed.score,
            )),
        ];
        match self.chat.complete(&messages, &self.options).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => RATIONALE_UNAVAILABLE.to_string(),
            Err(e) => {
                warn!(opportunity = assessed.opportunity.id, error = %e, "rationale generation failed");
                fallback_rationale(&assessed.score)
            }
        }
    }
}
