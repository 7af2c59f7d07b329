//! Per-word audio timing: maps a playback position to the word currently
//! being spoken in the reference recitation.

/// `[start_ms, end_ms]` window during which one word is being spoken.
pub type WordSegment = [u64; 2];

/// How far ahead of a segment's start the highlight turns on, so the eye
/// reaches the word slightly before the reciter does.
pub const DEFAULT_LEAD_MS: u64 = 900;

/// Word index for a playback position, or `None` before the first window
/// or inside a gap between words.
///
/// A word is current from `start - lead_ms` (saturating) through `end`
/// inclusive. The pre-roll can make adjacent windows overlap; the earlier
/// word wins at the boundary. Segments are expected sorted by start time,
/// which permits the early return once the position precedes a window.
pub fn word_index_at(position_ms: u64, segments: &[WordSegment], lead_ms: u64) -> Option<usize> {
    for (index, segment) in segments.iter().enumerate() {
        let opens_at = segment[0].saturating_sub(lead_ms);
        if position_ms < opens_at {
            return None;
        }
        if position_ms <= segment[1] {
            return Some(index);
        }
    }
    None
}

/// Whitespace-delimited word count of a verse text.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Timing is only usable when there is exactly one segment per word.
/// A mismatched verse record means "no timing available", not a failure.
pub fn timing_matches(text: &str, segments: &[WordSegment]) -> bool {
    !segments.is_empty() && segments.len() == word_count(text)
}
