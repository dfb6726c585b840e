//! Recognition matcher
//!
//! Pure, deterministic best-match search over a candidate set of enrolled
//! students' embeddings. Per-student score is the maximum cosine similarity
//! across that student's embeddings; the best student wins. Similarity ties
//! within 1e-6 are broken toward the older enrollment (smaller embedding
//! id).

use uuid::Uuid;

use crate::db::models::CandidateEmbedding;
use crate::recognition::provider::cosine_similarity;

/// Tie margin under which two students are considered equally similar.
const TIE_EPSILON: f32 = 1e-6;

/// Best match for a query vector against a candidate set.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub student_id: Uuid,
    pub student_name: String,
    /// Embedding row that produced the best similarity
    pub embedding_id: i64,
    pub similarity: f32,
    /// True iff similarity cleared the threshold
    pub matched: bool,
}

/// Find the best-matching student for a unit-normalized query vector.
///
/// Returns None when the candidate set is empty. The result does not depend
/// on candidate order.
pub fn best_match(
    query: &[f32],
    candidates: &[CandidateEmbedding],
    threshold: f32,
) -> Option<MatchResult> {
    let mut best: Option<MatchResult> = None;

    for candidate in candidates {
        let similarity = cosine_similarity(query, &candidate.vector);

        let improves = match &best {
            None => true,
            Some(current) => {
                if similarity > current.similarity + TIE_EPSILON {
                    true
                } else if (similarity - current.similarity).abs() <= TIE_EPSILON {
                    candidate.embedding_id < current.embedding_id
                } else {
                    false
                }
            }
        };

        if improves {
            best = Some(MatchResult {
                student_id: candidate.student_id,
                student_name: candidate.student_name.clone(),
                embedding_id: candidate.embedding_id,
                similarity,
                matched: false,
            });
        }
    }

    best.map(|mut m| {
        m.matched = m.similarity >= threshold;
        m
    })
}
