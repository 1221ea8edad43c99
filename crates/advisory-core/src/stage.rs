//! Conversation stage detection and stage-specific prompting.
//!
//! A conversation advances through four stages based purely on how many
//! `user` turns it contains:
//!
//! | User turns | Stage            |
//! |------------|------------------|
//! | 0–2        | `discovery`      |
//! | 3–4        | `exploration`    |
//! | 5–6        | `solution`       |
//! | 7+         | `implementation` |
//!
//! Boundaries are inclusive. Because histories are append-only, the stage
//! never moves backwards for a given conversation.
//!
//! Every function here is pure and total.

use crate::models::{ConversationTurn, Role, Stage};

/// Maximum number of follow-up questions shown to the user per turn.
pub const DISPLAYED_FOLLOW_UPS: usize = 3;

const BASE_PROMPT: &str = "You are the SMEC AI Advisor, an intelligent assistant for the Small to Medium Enterprise Centre of Artificial Intelligence (SMEC AI). SMEC AI is an Australian Government-backed initiative that helps SMEs (Small: 1-19 employees, Medium: 20-199 employees) adopt both new and existing AI solutions.

Your mission is to guide Australian SMEs through AI discovery, assessment, and implementation across four priority industries:
- Agriculture: Precision farming, crop monitoring, supply chain optimization
- Clean Energy: Grid optimization, predictive maintenance, energy forecasting
- Medical/Healthcare: Diagnostic assistance, patient flow, research acceleration
- Enabling Capabilities: Process automation, quality control, predictive analytics (advanced manufacturing, technology)

SMEC AI Services you can recommend:
- AI Products & Consultations: For businesses ready to adopt existing solutions
- One-on-One Consultations: Personalized guidance (500+ available)
- Short Courses: AI skill development programs
- AI Studio Program: 8-week intensive program for custom AI solution development

Key Features:
- Free service funded by Australian Government's AI Adopt program
- Industry-specific AI recommendations based on business context
- AI maturity evaluation and readiness assessment
- ROI calculators and implementation timeline guidance
- Connection to vetted AI solution providers and university partners
- Grant and funding opportunity information

Design Principles:
- Simplicity first: No technical jargon unless necessary
- Action-oriented: Every conversation leads to clear next steps
- Trust building: Transparent about AI capabilities and limitations
- Inclusive design: Accessible to users of all technical backgrounds
- Value-focused: Emphasizes practical business outcomes over technology

Always assess business size, industry sector, current technology usage, pain points, and budget constraints to provide personalized AI opportunity recommendations.";

const DISCOVERY_PROMPT: &str = "Current conversation stage: DISCOVERY
Welcome the user to SMEC AI and understand their business context. Ask about:
- Industry sector (agriculture, clean energy, medical, enabling capabilities)
- Business size (1-19 employees = small, 20-199 = medium)
- Current technology usage and digital maturity
- Specific business challenges or goals
- AI knowledge level and previous experience";

const EXPLORATION_PROMPT: &str = "Current conversation stage: EXPLORATION
Based on their business context, explore specific AI opportunities. Discuss:
- Relevant AI use cases for their industry and business size
- Current pain points that AI could address
- Budget considerations and implementation timeline
- Technical readiness and resource requirements
- Potential ROI and business impact";

const SOLUTION_PROMPT: &str = "Current conversation stage: ASSESSMENT & SOLUTION
Provide AI maturity evaluation and specific recommendations:
- Assess readiness for different AI solutions
- Prioritize opportunities by impact and feasibility
- Recommend appropriate SMEC AI services (consultations, courses, AI Studio)
- Provide realistic implementation timelines and resource requirements
- Suggest vetted AI solutions from the product directory";

const IMPLEMENTATION_PROMPT: &str = "Current conversation stage: CONNECTION & NEXT STEPS
Guide toward concrete action and SMEC AI service engagement:
- Recommend specific SMEC AI services and programs
- Provide direct links to book consultations or register for courses
- Assess eligibility for the 8-week AI Studio Program
- Offer conversation summary and recommendations for download
- Connect with relevant university partners or tech providers
- Inform about funding opportunities and grants";

const DISCOVERY_QUESTIONS: [&str; 5] = [
    "Which industry best describes your business: agriculture, clean energy, medical/healthcare, or enabling capabilities?",
    "How many employees does your business have?",
    "What specific business challenges are you hoping AI might help solve?",
    "What's your current level of experience with AI or digital technologies?",
    "Are you looking to improve efficiency, reduce costs, or explore new opportunities?",
];

const EXPLORATION_QUESTIONS: [&str; 5] = [
    "What AI applications have you heard about in your industry that interest you?",
    "What's your estimated budget range for AI implementation?",
    "Do you have internal technical expertise, or would you need external support?",
    "What would be your ideal timeline for implementing an AI solution?",
    "Are there any specific processes or areas of your business you'd like to focus on?",
];

const SOLUTION_QUESTIONS: [&str; 5] = [
    "Which of these AI opportunities seems most relevant to your immediate needs?",
    "Would you be interested in starting with a consultation to dive deeper into these options?",
    "Are you more interested in adopting existing AI solutions or developing something custom?",
    "What level of support would you prefer: self-guided learning, one-on-one guidance, or intensive program?",
    "Would you like me to check your eligibility for the AI Studio Program?",
];

const IMPLEMENTATION_QUESTIONS: [&str; 5] = [
    "Would you like me to help you book a consultation with one of our AI specialists?",
    "Are you interested in our short courses to build internal AI knowledge first?",
    "Should I provide you with a summary of our conversation and recommendations?",
    "Would information about available grants or funding opportunities be helpful?",
    "Are there other SMEs in your network who might benefit from SMEC AI services?",
];

/// Derive the stage from the number of `user` turns in the history.
pub fn determine_stage(history: &[ConversationTurn]) -> Stage {
    let user_turns = history.iter().filter(|t| t.role == Role::User).count();
    stage_for_user_turns(user_turns)
}

/// Map a user-turn count onto the stage ladder.
pub fn stage_for_user_turns(user_turns: usize) -> Stage {
    match user_turns {
        0..=2 => Stage::Discovery,
        3..=4 => Stage::Exploration,
        5..=6 => Stage::Solution,
        _ => Stage::Implementation,
    }
}

/// Base persona prompt followed by the stage's instruction block.
pub fn build_system_prompt(stage: Stage) -> String {
    let block = match stage {
        Stage::Discovery => DISCOVERY_PROMPT,
        Stage::Exploration => EXPLORATION_PROMPT,
        Stage::Solution => SOLUTION_PROMPT,
        Stage::Implementation => IMPLEMENTATION_PROMPT,
    };
    format!("{}\n\n{}", BASE_PROMPT, block)
}

/// Full ordered list of candidate follow-up questions for a stage.
pub fn follow_up_questions(stage: Stage) -> &'static [&'static str] {
    match stage {
        Stage::Discovery => &DISCOVERY_QUESTIONS,
        Stage::Exploration => &EXPLORATION_QUESTIONS,
        Stage::Solution => &SOLUTION_QUESTIONS,
        Stage::Implementation => &IMPLEMENTATION_QUESTIONS,
    }
}

/// The first [`DISPLAYED_FOLLOW_UPS`] questions for a stage, owned.
pub fn displayed_follow_ups(stage: Stage) -> Vec<String> {
    follow_up_questions(stage)
        .iter()
        .take(DISPLAYED_FOLLOW_UPS)
        .map(|q| q.to_string())
        .collect()
}
