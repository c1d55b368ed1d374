//! Utterance segmentation for the device backend
//!
//! Energy-based voice activity gate: splits a continuous sample stream into
//! utterances that are then sent to a speech-to-text provider.

use super::SAMPLE_RATE;

/// Minimum audio energy threshold to consider speech
pub const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to keep an utterance (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Trailing silence that ends an utterance (in samples)
const SILENCE_SAMPLES: usize = 12800; // 0.8 seconds

/// Longest utterance before it is cut (in samples)
const MAX_UTTERANCE_SAMPLES: usize = SAMPLE_RATE as usize * 30;

/// What a chunk of audio did to the segmenter
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    /// Voice activity began
    SpeechStarted,
    /// An utterance ended; carries its samples
    SpeechEnded(Vec<f32>),
    /// Voice activity was too short to be an utterance
    Discarded,
}

/// Splits a sample stream into utterances
#[derive(Debug)]
pub struct SpeechSegmenter {
    threshold: f32,
    in_speech: bool,
    speech_buffer: Vec<f32>,
    voiced_samples: usize,
    silence_counter: usize,
}

impl Default for SpeechSegmenter {
    fn default() -> Self {
        Self::new(ENERGY_THRESHOLD)
    }
}

impl SpeechSegmenter {
    /// Create a segmenter with an RMS energy threshold
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self {
            threshold,
            in_speech: false,
            speech_buffer: Vec::new(),
            voiced_samples: 0,
            silence_counter: 0,
        }
    }

    /// Process audio samples
    ///
    /// Returns an event when speech starts, when an utterance completes, or
    /// when a burst of noise turned out too short to be speech.
    pub fn push(&mut self, samples: &[f32]) -> Option<SegmentEvent> {
        let energy = calculate_energy(samples);
        let is_speech = energy > self.threshold;

        if !self.in_speech {
            if is_speech {
                self.in_speech = true;
                self.speech_buffer.clear();
                self.speech_buffer.extend_from_slice(samples);
                self.voiced_samples = samples.len();
                self.silence_counter = 0;
                tracing::trace!(energy, "speech detected");
                return Some(SegmentEvent::SpeechStarted);
            }
            return None;
        }

        self.speech_buffer.extend_from_slice(samples);
        if is_speech {
            self.voiced_samples += samples.len();
            self.silence_counter = 0;
        } else {
            self.silence_counter += samples.len();
        }

        let too_long = self.speech_buffer.len() >= MAX_UTTERANCE_SAMPLES;
        if self.silence_counter <= SILENCE_SAMPLES && !too_long {
            return None;
        }

        let enough_speech = self.voiced_samples >= MIN_SPEECH_SAMPLES;
        let utterance = std::mem::take(&mut self.speech_buffer);
        self.reset();

        if enough_speech {
            tracing::debug!(samples = utterance.len(), too_long, "utterance complete");
            Some(SegmentEvent::SpeechEnded(utterance))
        } else {
            tracing::trace!("speech too short - discarding");
            Some(SegmentEvent::Discarded)
        }
    }

    /// Whether an utterance is in progress
    #[must_use]
    pub const fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Reset to waiting for speech
    pub fn reset(&mut self) {
        self.in_speech = false;
        self.speech_buffer.clear();
        self.voiced_samples = 0;
        self.silence_counter = 0;
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(calculate_energy(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(calculate_energy(&loud) > 0.4);

        assert!(calculate_energy(&[]) < f32::EPSILON);
    }

    #[test]
    fn test_silence_never_starts() {
        let mut segmenter = SpeechSegmenter::default();
        assert_eq!(segmenter.push(&[0.0; 1600]), None);
        assert!(!segmenter.in_speech());
    }

    #[test]
    fn test_short_click_discarded() {
        let mut segmenter = SpeechSegmenter::default();
        assert_eq!(
            segmenter.push(&[0.5; 800]),
            Some(SegmentEvent::SpeechStarted)
        );
        assert_eq!(segmenter.push(&[0.0; 8000]), None);
        assert_eq!(
            segmenter.push(&[0.0; 8000]),
            Some(SegmentEvent::Discarded)
        );
        assert!(!segmenter.in_speech());
    }
}
