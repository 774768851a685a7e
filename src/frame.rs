//! PCM frame model and shape normalization.
//!
//! The mixer operates on exactly one canonical shape: mono, 48 kHz,
//! s16, 960 samples (20 ms). Inbound frames may arrive in any shape the
//! peer layer hands over; [`Frame::mix_into`] folds them into the
//! mixer's `f32` domain regardless, so ingestion never fails on format.

use crate::constants::*;
use byteorder::{ByteOrder, LittleEndian};

/// Interleaved sample storage for one frame of audio.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum SampleData {
    /// Signed 16-bit integer samples.
    S16(Vec<i16>),
    /// 32-bit float samples, nominally in `[-1, 1]`.
    F32(Vec<f32>),
}

/// One chunk of interleaved PCM audio with a presentation timestamp.
///
/// `pts` is measured in samples at `sample_rate`; the implied time base
/// is `1 / sample_rate`.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Interleaved sample data.
    pub data: SampleData,
    /// Number of interleaved channels.
    pub channels: usize,
    /// Sample rate, in Hz.
    pub sample_rate: u32,
    /// Presentation timestamp, in samples at `sample_rate`.
    pub pts: u64,
}

impl Frame {
    /// Builds a canonical frame (mono, 48 kHz, s16, 960 samples) from
    /// mixer output.
    ///
    /// Samples are clipped to `[-1, 1]` before conversion.
    #[must_use]
    pub fn canonical(pts: u64, samples: &[f32; MONO_FRAME_SIZE]) -> Self {
        let data = samples
            .iter()
            .map(|s| {
                let scaled = (s.max(-1.0).min(1.0) * 32_768.0) as i32;
                scaled.min(i32::from(i16::MAX)) as i16
            })
            .collect();

        Self {
            data: SampleData::S16(data),
            channels: 1,
            sample_rate: SAMPLE_RATE_RAW as u32,
            pts,
        }
    }

    /// Builds a canonical-shape frame from an s16-little-endian payload,
    /// as produced by [`payload`].
    ///
    /// [`payload`]: Frame::payload
    #[must_use]
    pub fn from_s16le_payload(pts: u64, payload: &[u8]) -> Self {
        let mut data = vec![0i16; payload.len() / 2];
        LittleEndian::read_i16_into(&payload[..data.len() * 2], &mut data);

        Self {
            data: SampleData::S16(data),
            channels: 1,
            sample_rate: SAMPLE_RATE_RAW as u32,
            pts,
        }
    }

    /// Number of samples per channel in this frame.
    #[must_use]
    pub fn samples_per_channel(&self) -> usize {
        let total = match &self.data {
            SampleData::S16(s) => s.len(),
            SampleData::F32(s) => s.len(),
        };

        if self.channels == 0 {
            0
        } else {
            total / self.channels
        }
    }

    /// Time base of `pts`, as a rational `(numerator, denominator)`.
    #[must_use]
    pub fn time_base(&self) -> (u32, u32) {
        (1, self.sample_rate)
    }

    /// Serializes this frame's samples as an s16-little-endian payload.
    ///
    /// Float data is clipped and converted at the boundary; the channel
    /// interleaving is preserved as stored.
    #[must_use]
    pub fn payload(&self) -> Vec<u8> {
        match &self.data {
            SampleData::S16(samples) => {
                let mut out = vec![0u8; samples.len() * 2];
                LittleEndian::write_i16_into(samples, &mut out);
                out
            },
            SampleData::F32(samples) => {
                let mut out = vec![0u8; samples.len() * 2];
                for (chunk, s) in out.chunks_exact_mut(2).zip(samples.iter()) {
                    let scaled = (s.max(-1.0).min(1.0) * 32_768.0) as i32;
                    LittleEndian::write_i16(chunk, scaled.min(i32::from(i16::MAX)) as i16);
                }
                out
            },
        }
    }

    /// Normalizes this frame and adds it into a mono `f32` accumulator.
    ///
    /// Any inbound shape is accepted:
    ///  * multiple channels are downmixed by arithmetic mean,
    ///  * integer samples are scaled by the signed maximum of their width,
    ///  * out-of-range float samples are rescued by `1 / max(|x|, 1)`,
    ///  * a length other than 960 is stretched by zero-order resize.
    pub fn mix_into(&self, target: &mut [f32; MONO_FRAME_SIZE]) {
        let n = self.samples_per_channel();
        if n == 0 {
            return;
        }

        let chans = self.channels;
        let chan_scale = 1.0 / chans as f32;

        match &self.data {
            SampleData::S16(samples) => {
                let gain = chan_scale / 32_768.0;
                for (i, slot) in target.iter_mut().enumerate() {
                    let j = if n == MONO_FRAME_SIZE {
                        i
                    } else {
                        i * n / MONO_FRAME_SIZE
                    };
                    let mut acc = 0.0f32;
                    for sample in &samples[j * chans..(j + 1) * chans] {
                        acc += f32::from(*sample);
                    }
                    *slot += gain * acc;
                }
            },
            SampleData::F32(samples) => {
                let peak = samples.iter().fold(1.0f32, |peak, s| peak.max(s.abs()));
                let gain = chan_scale / peak;
                for (i, slot) in target.iter_mut().enumerate() {
                    let j = if n == MONO_FRAME_SIZE {
                        i
                    } else {
                        i * n / MONO_FRAME_SIZE
                    };
                    let mut acc = 0.0f32;
                    for sample in &samples[j * chans..(j + 1) * chans] {
                        acc += *sample;
                    }
                    *slot += gain * acc;
                }
            },
        }
    }
}
