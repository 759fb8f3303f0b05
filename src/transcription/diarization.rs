//! Heuristic speaker labeling.
//!
//! This is NOT acoustic speaker diarization. It assigns alternating
//! `Speaker N` labels from segment timing alone: a pause longer than the
//! threshold advances the speaker counter, and every 4th segment advances it
//! again to inject variation. A real diarization engine can replace this
//! module without touching the clients or the task tracker.

use tracing::debug;

use super::TranscriptSegment;

/// Pause length (seconds) treated as a probable speaker change.
const SPEAKER_CHANGE_THRESHOLD: f64 = 2.0;

/// Label segments with heuristic `Speaker N` names, cycling through at most
/// `max_speakers` labels. Segments are mutated in place, in chronological
/// order.
pub fn label_speakers(segments: &mut [TranscriptSegment], max_speakers: u32) {
    if segments.is_empty() {
        return;
    }

    let max_speakers = max_speakers.max(1);
    let total = segments.len();
    let mut current_speaker: u32 = 1;
    let mut last_end_time: f64 = 0.0;

    for (i, segment) in segments.iter_mut().enumerate() {
        if segment.start - last_end_time > SPEAKER_CHANGE_THRESHOLD {
            current_speaker = (current_speaker % max_speakers) + 1;
        }

        segment.speaker = Some(format!("Speaker {}", current_speaker));
        last_end_time = segment.end;

        // Periodic rotation for variety, only on longer transcripts.
        if i > 0 && i % 4 == 0 && total > 5 {
            current_speaker = (current_speaker % max_speakers) + 1;
        }
    }

    debug!("Labeled {} segments with up to {} speakers", total, max_speakers);
}
