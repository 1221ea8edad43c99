//! Retrieval result shaping: namespace resolution, merging, and ranking.
//!
//! The vector index is partitioned into one namespace per industry plus a
//! catch-all `all_industries` namespace. Callers use loose labels
//! (`healthcare`, `clean-energy`, `manufacturing`), so every lookup first
//! resolves the label through [`resolve_namespace`].
//!
//! Result sets from several namespaces or several expanded queries are
//! combined with [`merge_ranked`]:
//!
//! 1. Deduplicate by document id, keeping the higher score.
//! 2. Drop results below `min_score`.
//! 3. Sort by score, descending.
//! 4. Truncate to `top_k`.

use std::collections::HashMap;

use crate::models::RetrievedDocument;

/// Namespace holding content relevant to every industry.
pub const ALL_INDUSTRIES: &str = "all_industries";

/// Canonical industry namespaces, in display order.
pub const INDUSTRY_NAMESPACES: [&str; 4] = [
    "agriculture",
    "clean_energy",
    "medical",
    "enabling_capabilities",
];

/// Number of expanded queries requested from the model.
pub const MAX_EXPANSIONS: usize = 3;

/// Expanded query lines shorter than this are discarded.
const MIN_EXPANSION_CHARS: usize = 10;

/// Map a caller-supplied industry label to its namespace.
///
/// Unknown labels pass through lower-cased.
pub fn resolve_namespace(label: &str) -> String {
    let lowered = label.trim().to_lowercase();
    let canonical = match lowered.as_str() {
        "agriculture" => "agriculture",
        "clean_energy" | "clean-energy" => "clean_energy",
        "medical" | "healthcare" => "medical",
        "enabling_capabilities" | "enabling-capabilities" | "manufacturing" | "technology" => {
            "enabling_capabilities"
        }
        "all_industries" | "all-industries" | "smec-services" | "smec_services" | "general" => {
            ALL_INDUSTRIES
        }
        _ => return lowered,
    };
    canonical.to_string()
}

/// Split a `top_k` budget across `parts` result sets, rounding up.
pub fn per_part(top_k: usize, parts: usize) -> usize {
    if parts == 0 {
        return top_k;
    }
    top_k.div_ceil(parts)
}

/// Deduplicate, filter, sort, and truncate result sets.
pub fn merge_ranked<I>(results: I, min_score: f32, top_k: usize) -> Vec<RetrievedDocument>
where
    I: IntoIterator<Item = RetrievedDocument>,
{
    let mut best: HashMap<String, RetrievedDocument> = HashMap::new();
    for doc in results {
        match best.get(&doc.id) {
            Some(existing) if existing.score >= doc.score => {}
            _ => {
                best.insert(doc.id.clone(), doc);
            }
        }
    }

    let mut merged: Vec<RetrievedDocument> = best
        .into_values()
        .filter(|d| d.score >= min_score)
        .collect();
    merged.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    merged.truncate(top_k);
    merged
}

/// System instruction for the query-expansion call.
pub fn expansion_system_prompt(industry: &str) -> String {
    format!(
        "You are an expert in {} and AI applications for small-medium enterprises. \
         Generate {} semantically related but distinct queries that would help find relevant \
         information for the original query. Focus on practical, SME-relevant aspects.",
        industry, MAX_EXPANSIONS
    )
}

/// User message for the query-expansion call.
pub fn expansion_user_prompt(query: &str) -> String {
    format!(
        "Original query: \"{}\"\n\nGenerate {} expanded queries (one per line, no numbers or bullets):",
        query, MAX_EXPANSIONS
    )
}

/// Parse expanded queries from a model reply: one per line, trimmed,
/// longer than ten characters, at most [`MAX_EXPANSIONS`].
pub fn parse_expansions(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(str::trim)
        .filter(|line| line.chars().count() > MIN_EXPANSION_CHARS)
        .take(MAX_EXPANSIONS)
        .map(str::to_string)
        .collect()
}

/// Heading of the grounding turn added to chat prompts.
pub const EXCERPTS_HEADER: &str = "Relevant knowledge base excerpts:";

/// Render retrieved passages as one system-prompt block, or `None` when
/// there is nothing to add.
pub fn excerpts_prompt(docs: &[RetrievedDocument]) -> Option<String> {
    if docs.is_empty() {
        return None;
    }
    let mut out = String::from(EXCERPTS_HEADER);
    for (i, doc) in docs.iter().enumerate() {
        let label = doc
            .metadata
            .title
            .as_deref()
            .or(doc.metadata.doc_id.as_deref())
            .unwrap_or(&doc.id);
        out.push_str(&format!("\n\n[{}] {}\n{}", i + 1, label, doc.content.trim()));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocMetadata;

    fn doc(id: &str, score: f32) -> RetrievedDocument {
        RetrievedDocument {
            id: id.to_string(),
            content: format!("content of {}", id),
            score,
            metadata: DocMetadata::default(),
        }
    }

    #[test]
    fn test_namespace_aliases() {
        assert_eq!(resolve_namespace("healthcare"), "medical");
        assert_eq!(resolve_namespace("Clean-Energy"), "clean_energy");
        assert_eq!(resolve_namespace("manufacturing"), "enabling_capabilities");
        assert_eq!(resolve_namespace("technology"), "enabling_capabilities");
        assert_eq!(resolve_namespace("smec-services"), ALL_INDUSTRIES);
        assert_eq!(resolve_namespace("general"), ALL_INDUSTRIES);
        assert_eq!(resolve_namespace("Mining"), "mining");
    }

    #[test]
    fn test_per_part_rounds_up() {
        assert_eq!(per_part(5, 2), 3);
        assert_eq!(per_part(10, 4), 3);
        assert_eq!(per_part(8, 4), 2);
        assert_eq!(per_part(3, 0), 3);
    }

    #[test]
    fn test_merge_keeps_higher_duplicate_score() {
        let merged = merge_ranked(
            vec![doc("a", 0.5), doc("b", 0.7), doc("a", 0.9)],
            0.0,
            10,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "a");
        assert_eq!(merged[0].score, 0.9);
    }

    #[test]
    fn test_merge_filters_sorts_truncates() {
        let merged = merge_ranked(
            vec![
                doc("low", 0.1),
                doc("mid", 0.5),
                doc("high", 0.95),
                doc("edge", 0.3),
                doc("next", 0.6),
            ],
            0.3,
            3,
        );
        let ids: Vec<_> = merged.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "next", "mid"]);
        for pair in merged.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert!(merged.iter().all(|d| d.score >= 0.3));
    }

    #[test]
    fn test_excerpts_prompt() {
        assert_eq!(excerpts_prompt(&[]), None);

        let mut titled = doc("a", 0.9);
        titled.metadata.title = Some("Drone scouting".into());
        let prompt = excerpts_prompt(&[titled, doc("b", 0.5)]).unwrap();
        assert!(prompt.starts_with(EXCERPTS_HEADER));
        assert!(prompt.contains("[1] Drone scouting\ncontent of a"));
        assert!(prompt.contains("[2] b\ncontent of b"));
    }

    #[test]
    fn test_parse_expansions() {
        let reply = "soil moisture sensing\nshort\n\n  satellite crop imagery  \nyield prediction models\nextra line beyond three";
        let parsed = parse_expansions(reply);
        assert_eq!(
            parsed,
            vec![
                "soil moisture sensing",
                "satellite crop imagery",
                "yield prediction models"
            ]
        );
    }
}
