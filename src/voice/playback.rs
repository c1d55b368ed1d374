//! Audio playback to speakers

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Plays audio to the default output device
///
/// Holds cpal handles, so it lives on the blocking thread that plays.
pub struct AudioPlayback {
    device: Device,
    config: StreamConfig,
}

impl AudioPlayback {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let config = output_config(&device)?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { device, config })
    }

    /// Play samples until done or `cancel` is raised
    ///
    /// `on_start` runs once the output stream is playing. Returns `false` when
    /// playback was cancelled.
    ///
    /// # Errors
    ///
    /// Returns error if the output stream fails
    pub fn play_blocking(
        &self,
        samples: Vec<f32>,
        volume: f32,
        cancel: &AtomicBool,
        on_start: impl FnOnce(),
    ) -> Result<bool> {
        if samples.is_empty() {
            on_start();
            return Ok(true);
        }

        let channels = self.config.channels as usize;
        let sample_count = samples.len();
        let volume = volume.clamp(0.0, 1.0);

        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);

            self.device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut pos = position.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            let sample = samples.get(pos).map_or_else(
                                || {
                                    finished.store(true, Ordering::Relaxed);
                                    0.0
                                },
                                |s| s * volume,
                            );
                            frame.fill(sample);
                            if pos < samples.len() {
                                pos += 1;
                            }
                        }
                        position.store(pos, Ordering::Relaxed);
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        on_start();

        let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
        let start = Instant::now();
        let timeout = Duration::from_millis(duration_ms + 500);

        let mut completed = true;
        while !finished.load(Ordering::Relaxed) {
            if cancel.load(Ordering::Relaxed) {
                completed = false;
                break;
            }
            if start.elapsed() > timeout {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        if completed {
            // Small delay to ensure audio finishes
            std::thread::sleep(Duration::from_millis(100));
        }

        drop(stream);
        tracing::debug!(samples = sample_count, completed, "playback complete");

        Ok(completed)
    }
}

/// Check that a usable output device exists
///
/// # Errors
///
/// Returns error if no output device or suitable config is available
pub fn probe_output() -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;
    output_config(&device).map(|_| ())
}

fn output_config(device: &Device) -> Result<StreamConfig> {
    let supports = |channels: u16| {
        move |c: &cpal::SupportedStreamConfigRange| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        }
    };

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(supports(1))
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(supports(2))
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    Ok(supported_config
        .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
        .config())
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the data is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}

/// A tone for speaker checks
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn test_tone(frequency: f32, duration: Duration) -> Vec<f32> {
    let count = (PLAYBACK_SAMPLE_RATE as f32 * duration.as_secs_f32()) as usize;
    (0..count)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            0.3 * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Shared cancel flag handed to a playback thread
pub type CancelFlag = Arc<AtomicBool>;

/// Guarded slot for the flag of the utterance currently playing
pub type CancelSlot = Mutex<Option<CancelFlag>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_empty_mp3() {
        let samples = decode_mp3(&[]).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_tone_length() {
        let tone = test_tone(440.0, Duration::from_millis(500));
        assert_eq!(tone.len(), PLAYBACK_SAMPLE_RATE as usize / 2);
        assert!(tone.iter().all(|s| s.abs() <= 0.3 + f32::EPSILON));
    }
}
