//! Utterance accumulation
//!
//! Final transcript segments pile up here until the STT backend signals an
//! utterance boundary, at which point they collapse into one chunk draft.

use crate::storage::models::count_words;
use crate::stream::stt::TranscriptSegment;
use std::collections::HashMap;

/// Collapsed utterance, ready to persist as a stream chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub transcript: String,
    pub speaker: Option<i64>,
    pub confidence: Option<f64>,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub word_count: i64,
}

/// Accumulates final segments for the current utterance
#[derive(Debug, Default)]
pub struct SegmentAccumulator {
    segments: Vec<TranscriptSegment>,
    utterance_start_ms: Option<i64>,
}

impl SegmentAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a final segment; blank or interim segments are ignored.
    /// The first accepted segment pins the utterance start.
    pub fn push(&mut self, segment: TranscriptSegment) {
        if !segment.is_final || segment.text.trim().is_empty() {
            return;
        }
        if self.utterance_start_ms.is_none() {
            self.utterance_start_ms = Some((segment.start * 1000.0) as i64);
        }
        self.segments.push(segment);
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// End of the last accumulated segment, in milliseconds
    pub fn last_segment_end_ms(&self) -> Option<i64> {
        self.segments
            .last()
            .map(|s| ((s.start + s.duration) * 1000.0) as i64)
    }

    /// Collapse the accumulated segments into one draft and reset.
    ///
    /// Transcript is the whitespace join, speaker the mode of non-null
    /// speakers, confidence the mean of known confidences.
    pub fn collapse(&mut self, end_time_ms: i64) -> Option<ChunkDraft> {
        if self.segments.is_empty() {
            return None;
        }

        let transcript = self
            .segments
            .iter()
            .map(|s| s.text.trim())
            .collect::<Vec<_>>()
            .join(" ");

        let speaker = modal_speaker(&self.segments);

        let confidences: Vec<f64> = self.segments.iter().filter_map(|s| s.confidence).collect();
        let confidence = if confidences.is_empty() {
            None
        } else {
            Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
        };

        let start_time_ms = self.utterance_start_ms.unwrap_or(0);
        let word_count = count_words(&transcript);

        self.segments.clear();
        self.utterance_start_ms = None;

        Some(ChunkDraft {
            transcript,
            speaker,
            confidence,
            start_time_ms,
            end_time_ms: end_time_ms.max(start_time_ms),
            word_count,
        })
    }
}

/// Most frequent non-null speaker; ties go to the lowest id
fn modal_speaker(segments: &[TranscriptSegment]) -> Option<i64> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for speaker in segments.iter().filter_map(|s| s.speaker) {
        *counts.entry(speaker).or_insert(0) += 1;
    }

    let mut best: Option<(i64, usize)> = None;
    for (speaker, count) in counts {
        best = match best {
            None => Some((speaker, count)),
            Some((bs, bc)) if count > bc || (count == bc && speaker < bs) => {
                Some((speaker, count))
            }
            keep => keep,
        };
    }
    best.map(|(speaker, _)| speaker)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(text: &str, speaker: Option<i64>, confidence: Option<f64>, start: f64) -> TranscriptSegment {
        TranscriptSegment {
            speaker,
            text: text.to_string(),
            confidence,
            is_final: true,
            start,
            duration: 1.0,
        }
    }

    #[test]
    fn test_collapse_joins_and_averages() {
        let mut acc = SegmentAccumulator::new();
        acc.push(segment("one two", Some(0), Some(0.8), 0.5));
        acc.push(segment("three", Some(0), Some(1.0), 1.6));

        let draft = acc.collapse(3400).unwrap();
        assert_eq!(draft.transcript, "one two three");
        assert_eq!(draft.speaker, Some(0));
        assert_eq!(draft.confidence, Some(0.9));
        assert_eq!(draft.start_time_ms, 500);
        assert_eq!(draft.end_time_ms, 3400);
        assert_eq!(draft.word_count, 3);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_interim_and_blank_segments_ignored() {
        let mut acc = SegmentAccumulator::new();
        let mut interim = segment("partial", Some(0), None, 0.0);
        interim.is_final = false;
        acc.push(interim);
        acc.push(segment("   ", Some(0), None, 0.2));
        assert!(acc.is_empty());
        assert!(acc.collapse(1000).is_none());
    }

    #[test]
    fn test_modal_speaker_prefers_majority_then_lowest() {
        let mut acc = SegmentAccumulator::new();
        acc.push(segment("a", Some(1), None, 0.0));
        acc.push(segment("b", Some(1), None, 1.0));
        acc.push(segment("c", Some(0), None, 2.0));
        assert_eq!(acc.collapse(3000).unwrap().speaker, Some(1));

        let mut acc = SegmentAccumulator::new();
        acc.push(segment("a", Some(2), None, 0.0));
        acc.push(segment("b", Some(1), None, 1.0));
        assert_eq!(acc.collapse(2000).unwrap().speaker, Some(1));
    }

    #[test]
    fn test_null_speakers_excluded_from_mode() {
        let mut acc = SegmentAccumulator::new();
        acc.push(segment("a", None, None, 0.0));
        acc.push(segment("b", Some(3), None, 1.0));
        acc.push(segment("c", None, None, 2.0));
        assert_eq!(acc.collapse(3000).unwrap().speaker, Some(3));

        let mut acc = SegmentAccumulator::new();
        acc.push(segment("a", None, None, 0.0));
        assert_eq!(acc.collapse(1000).unwrap().speaker, None);
    }

    #[test]
    fn test_confidence_none_when_unknown() {
        let mut acc = SegmentAccumulator::new();
        acc.push(segment("a", Some(0), None, 0.0));
        assert_eq!(acc.collapse(1000).unwrap().confidence, None);
    }

    #[test]
    fn test_end_never_precedes_start() {
        let mut acc = SegmentAccumulator::new();
        acc.push(segment("late", Some(0), None, 5.0));
        let draft = acc.collapse(1000).unwrap();
        assert_eq!(draft.start_time_ms, 5000);
        assert_eq!(draft.end_time_ms, 5000);
    }

    #[test]
    fn test_last_segment_end_tracks_latest() {
        let mut acc = SegmentAccumulator::new();
        assert!(acc.last_segment_end_ms().is_none());
        acc.push(segment("a", Some(0), None, 2.0));
        assert_eq!(acc.last_segment_end_ms(), Some(3000));
    }
}
