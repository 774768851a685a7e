//! 440 Hz tone synthesis for fallback output and test injection.

use crate::{constants::*, frame::Frame, source::Source};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Adds a 440 Hz sine at `amplitude` over `buf`.
///
/// The phase is derived from `pts`, so consecutive frames of a running
/// mixer join without a discontinuity.
pub(crate) fn fill(buf: &mut [f32], pts: u64, amplitude: f32) {
    let step = f64::from(FALLBACK_TONE_FREQ) * std::f64::consts::TAU / SAMPLE_RATE_RAW as f64;

    for (i, slot) in buf.iter_mut().enumerate() {
        let phase = step * (pts + i as u64) as f64;
        *slot += amplitude * phase.sin() as f32;
    }
}

/// Spawns a task feeding `duration` of tone through `source` at the
/// output frame cadence, then ending the source.
pub(crate) fn spawn_tone_feed(
    source: Source,
    duration: Duration,
    amplitude: f32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let frames = duration.as_millis() as u64 / FRAME_LEN_MS as u64;
        let mut ticker = tokio::time::interval(TIMESTEP_LENGTH);
        let mut pts = 0u64;

        for _ in 0..frames {
            ticker.tick().await;
            let mut buf = [0.0f32; MONO_FRAME_SIZE];
            fill(&mut buf, pts, amplitude);
            source.broadcast(Frame::canonical(pts, &buf));
            pts += MONO_FRAME_SIZE as u64;
        }

        source.end();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_frames_stay_phase_aligned() {
        let mut first = [0.0f32; MONO_FRAME_SIZE];
        let mut second = [0.0f32; MONO_FRAME_SIZE];
        fill(&mut first, 0, 0.5);
        fill(&mut second, MONO_FRAME_SIZE as u64, 0.5);

        let mut joined = vec![0.0f32; 2 * MONO_FRAME_SIZE];
        let step = f64::from(FALLBACK_TONE_FREQ) * std::f64::consts::TAU / SAMPLE_RATE_RAW as f64;
        for (i, slot) in joined.iter_mut().enumerate() {
            *slot = 0.5 * (step * i as f64).sin() as f32;
        }

        for i in 0..MONO_FRAME_SIZE {
            assert!((first[i] - joined[i]).abs() < 1e-6);
            assert!((second[i] - joined[MONO_FRAME_SIZE + i]).abs() < 1e-6);
        }
    }
}
