//! Per-word correctness overlay derived from a pronunciation evaluation.

use serde::Serialize;

use crate::api::Evaluation;

/// Four-tier scale the presentation maps to colors/labels. The boundaries
/// mirror the original word chip styling: full marks, above 90%, above 70%,
/// everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreTier {
    Perfect,
    Good,
    Fair,
    Poor,
}

impl ScoreTier {
    pub fn from_ratio(ratio: f32) -> Self {
        if ratio >= 1.0 {
            ScoreTier::Perfect
        } else if ratio > 0.9 {
            ScoreTier::Good
        } else if ratio > 0.7 {
            ScoreTier::Fair
        } else {
            ScoreTier::Poor
        }
    }
}

/// Correctness ratio for one word of the displayed verse, or `None` when
/// the evaluation does not apply: it belongs to another verse, the word
/// lies outside the evaluated `[start_index, end_index)` range, or the
/// ratio list is shorter than the index.
pub fn ratio_for(word_index: usize, verse_id: &str, evaluation: &Evaluation) -> Option<f32> {
    if evaluation.verse_id != verse_id {
        return None;
    }
    let start = evaluation.start_index as usize;
    let end = evaluation.end_index as usize;
    if word_index < start || word_index >= end {
        return None;
    }
    evaluation.ratios.get(word_index).copied()
}
