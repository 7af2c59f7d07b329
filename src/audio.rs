//! Microphone capture and WAV encoding for recitation attempts.
//!
//! Capture uses a fixed preset: 16 kHz mono f32 PCM, converted from
//! whatever the default input device delivers. The samples are encoded as
//! 16-bit PCM WAV just before upload.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::Arc;

pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Microphone capture. Holds the input stream open until `stop`.
pub struct MicCapture {
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<cpal::Stream>,
}

// Safety: MicCapture lives inside the engine's single thread of control and
// is dropped in place. cpal::Stream is !Send due to internal raw pointers,
// but the stream is never moved across threads once built.
unsafe impl Send for MicCapture {}

impl MicCapture {
    /// Start capturing from the default input device.
    pub fn start() -> Result<Self, String> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or("No default input device available")?;

        let config = device
            .default_input_config()
            .map_err(|e| format!("Failed to get input config: {e}"))?;

        let sample_rate = config.sample_rate();
        let channels = config.channels() as usize;
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let buffer_clone = buffer.clone();

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device
                .build_input_stream(
                    &config.into(),
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        push_chunk(data, sample_rate, channels, &buffer_clone);
                    },
                    |err| tracing::warn!("audio input stream error: {err}"),
                    None,
                )
                .map_err(|e| format!("Failed to build input stream: {e}"))?,
            cpal::SampleFormat::I16 => device
                .build_input_stream(
                    &config.into(),
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let float_data: Vec<f32> = data
                            .iter()
                            .map(|&s| f32::from(s) / f32::from(i16::MAX))
                            .collect();
                        push_chunk(&float_data, sample_rate, channels, &buffer_clone);
                    },
                    |err| tracing::warn!("audio input stream error: {err}"),
                    None,
                )
                .map_err(|e| format!("Failed to build input stream: {e}"))?,
            format => return Err(format!("Unsupported sample format: {format:?}")),
        };

        stream
            .play()
            .map_err(|e| format!("Failed to start audio stream: {e}"))?;

        Ok(Self {
            buffer,
            stream: Some(stream),
        })
    }

    /// Stop capturing and return the collected 16 kHz mono samples.
    /// Dropping the stream releases the device.
    pub fn stop(mut self) -> Vec<f32> {
        self.stream.take();
        let buffer = self.buffer.lock();
        buffer.clone()
    }
}

/// Downmix to mono and resample to the capture rate.
fn push_chunk(data: &[f32], sample_rate: u32, channels: usize, buffer: &Arc<Mutex<Vec<f32>>>) {
    let mono: Vec<f32> = data
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    if sample_rate == CAPTURE_SAMPLE_RATE {
        buffer.lock().extend_from_slice(&mono);
        return;
    }

    // Nearest-neighbor resampling; adequate for speech scoring input.
    let ratio = f64::from(CAPTURE_SAMPLE_RATE) / f64::from(sample_rate);
    let output_len = (mono.len() as f64 * ratio) as usize;
    let mut resampled = Vec::with_capacity(output_len);
    for i in 0..output_len {
        let src_idx = (i as f64 / ratio) as usize;
        if src_idx < mono.len() {
            resampled.push(mono[src_idx]);
        }
    }
    buffer.lock().extend_from_slice(&resampled);
}

/// Encode f32 samples as a mono 16-bit PCM WAV file in memory.
pub fn encode_wav_pcm16(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;
    const BLOCK_ALIGN: u16 = CHANNELS * (BITS_PER_SAMPLE / 8);

    let byte_rate = sample_rate * u32::from(BLOCK_ALIGN);
    let data_len = (samples.len() * 2) as u32;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&CHANNELS.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&BLOCK_ALIGN.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());

    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}
