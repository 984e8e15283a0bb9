//! Near-duplicate rejection for candidate observations. Two tiers: vector
//! KNN when an embedding is available, text Jaccard always as fallback.
//! A duplicate verdict is normal flow, not an error.

use crate::db::Store;
use anyhow::Result;
use std::collections::HashSet;

const VECTOR_DUPLICATE_DISTANCE: f32 = 0.08;
const TEXT_DUPLICATE_SIMILARITY: f64 = 0.85;
const RECENT_WINDOW: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveReason {
    Ok,
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct SaveDecision {
    pub save: bool,
    pub reason: SaveReason,
    pub duplicate_of: Option<String>,
}

impl SaveDecision {
    fn ok() -> Self {
        Self {
            save: true,
            reason: SaveReason::Ok,
            duplicate_of: None,
        }
    }

    fn duplicate(of: String) -> Self {
        Self {
            save: false,
            reason: SaveReason::Duplicate,
            duplicate_of: Some(of),
        }
    }
}

pub fn check(
    store: &Store,
    project: &str,
    content: &str,
    embedding: Option<&[f32]>,
) -> Result<SaveDecision> {
    // Vector tier: only when the candidate has an embedding and the project
    // has a vector index to compare against.
    if let Some(vec) = embedding {
        if store.has_vectors(project)? {
            if let Some((id, dist)) = store.vector_search(project, vec, 1)?.into_iter().next() {
                if dist < VECTOR_DUPLICATE_DISTANCE {
                    crate::models::debug_log(&format!(
                        "duplicate by vector (dist {dist:.4}) of {id}"
                    ));
                    return Ok(SaveDecision::duplicate(id));
                }
            }
        }
    }

    // Text tier: Jaccard against the recent window, unclassified included.
    for prior in store.recent_observations(project, RECENT_WINDOW)? {
        let sim = jaccard(content, &prior.content);
        if sim >= TEXT_DUPLICATE_SIMILARITY {
            crate::models::debug_log(&format!("duplicate by text (jaccard {sim:.3}) of {}", prior.id));
            return Ok(SaveDecision::duplicate(prior.id));
        }
    }

    Ok(SaveDecision::ok())
}

/// Jaccard similarity over whitespace-tokenised content.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.len() + set_b.len() - intersection;
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObservationKind;
    use crate::observations::NewObservation;

    fn obs(content: &str) -> NewObservation {
        NewObservation {
            project: "p".to_string(),
            session_id: Some("s1".to_string()),
            kind: Some(ObservationKind::Change),
            title: None,
            content: content.to_string(),
            source: "hook:Write".to_string(),
        }
    }

    #[test]
    fn jaccard_identical_is_one() {
        assert_eq!(jaccard("a b c", "c b a"), 1.0);
    }

    #[test]
    fn jaccard_disjoint_is_zero() {
        assert_eq!(jaccard("a b", "c d"), 0.0);
    }

    #[test]
    fn jaccard_partial_overlap() {
        // {a,b,c} vs {b,c,d}: 2 shared, 4 union
        assert!((jaccard("a b c", "b c d") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn jaccard_empty_edge_cases() {
        assert_eq!(jaccard("", ""), 1.0);
        assert_eq!(jaccard("a", ""), 0.0);
    }

    #[test]
    fn fresh_content_is_saved() {
        let store = Store::open_in_memory().unwrap();
        store.insert_observation(&obs("updated the parser module")).unwrap();
        let decision = check(&store, "p", "completely different topic entirely", None).unwrap();
        assert!(decision.save);
        assert_eq!(decision.reason, SaveReason::Ok);
    }

    #[test]
    fn near_identical_text_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .insert_observation(&obs("[Write] Created /src/app.ts export const g hi"))
            .unwrap();
        let decision = check(&store, "p", "[Write] Created /src/app.ts export const g hi", None).unwrap();
        assert!(!decision.save);
        assert_eq!(decision.reason, SaveReason::Duplicate);
        assert_eq!(decision.duplicate_of.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn text_tier_is_project_scoped() {
        let store = Store::open_in_memory().unwrap();
        store.insert_observation(&obs("same content here")).unwrap();
        let decision = check(&store, "other_project", "same content here", None).unwrap();
        assert!(decision.save);
    }

    #[test]
    fn vector_tier_rejects_close_neighbour() {
        let store = Store::open_in_memory().unwrap();
        let id = store.insert_observation(&obs("semantic twin")).unwrap();
        store.set_embedding(&id, &[1.0, 0.0, 0.0]).unwrap();

        let decision = check(&store, "p", "totally different words", Some(&[0.999, 0.02, 0.0])).unwrap();
        assert!(!decision.save);
        assert_eq!(decision.duplicate_of.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn vector_tier_passes_distant_neighbour_to_text_tier() {
        let store = Store::open_in_memory().unwrap();
        let id = store.insert_observation(&obs("stored earlier note")).unwrap();
        store.set_embedding(&id, &[1.0, 0.0, 0.0]).unwrap();

        let decision = check(&store, "p", "unrelated fresh note", Some(&[0.0, 1.0, 0.0])).unwrap();
        assert!(decision.save);
    }

    #[test]
    fn text_tier_runs_without_embedding_service() {
        let store = Store::open_in_memory().unwrap();
        store.insert_observation(&obs("alpha beta gamma delta")).unwrap();
        let decision = check(&store, "p", "alpha beta gamma delta", None).unwrap();
        assert!(!decision.save);
    }
}
