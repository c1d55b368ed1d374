//! Audio capture from microphone
//!
//! cpal streams are not `Send`, so each capture session owns its stream on a
//! dedicated thread and forwards sample chunks through a channel.

use std::sync::mpsc as std_mpsc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// A live capture session on the default input device
///
/// Dropping the session stops the stream.
pub struct AudioCapture {
    stop_tx: Option<std_mpsc::Sender<()>>,
}

impl AudioCapture {
    /// Open the default input device and stream samples into `samples`
    ///
    /// Blocks until the stream is playing; call from a blocking context.
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened or started
    pub fn start(samples: mpsc::UnboundedSender<Vec<f32>>) -> Result<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("voiceloop-capture".to_string())
            .spawn(move || {
                let stream = match open_input_stream(samples) {
                    Ok(stream) => stream,
                    Err(e) => {
                        ready_tx.send(Err(e)).ok();
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    ready_tx.send(Err(Error::Audio(e.to_string()))).ok();
                    return;
                }
                ready_tx.send(Ok(())).ok();

                // Either an explicit stop or the handle being dropped ends the session
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread exited".to_string()))??;

        tracing::debug!("audio capture started");
        Ok(Self {
            stop_tx: Some(stop_tx),
        })
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            tx.send(()).ok();
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Check that a usable input device exists
///
/// # Errors
///
/// Returns error if no input device or no 16kHz mono config is available
pub fn probe_input() -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;
    input_config(&device).map(|_| ())
}

fn open_input_stream(samples: mpsc::UnboundedSender<Vec<f32>>) -> Result<Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let config = input_config(&device)?;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        channels = config.channels,
        "audio capture initialized"
    );

    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                samples.send(data.to_vec()).ok();
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

fn input_config(device: &Device) -> Result<StreamConfig> {
    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    Ok(supported_config
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config())
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
