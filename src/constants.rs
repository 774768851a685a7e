//! Constants fixing the hub's canonical audio shape and timing.

use std::time::Duration;

/// Sample rate of all mixer-internal audio.
pub const SAMPLE_RATE_RAW: usize = 48_000;

/// Number of audio frames to be mixed per second.
pub const AUDIO_FRAME_RATE: usize = 50;

/// Number of samples in one complete frame of mono audio.
pub const MONO_FRAME_SIZE: usize = SAMPLE_RATE_RAW / AUDIO_FRAME_RATE;

/// Length of time between any two audio frames.
pub const TIMESTEP_LENGTH: Duration = Duration::from_millis(1000 / AUDIO_FRAME_RATE as u64);

/// Length (in milliseconds) of any audio frame.
pub const FRAME_LEN_MS: usize = 1000 / AUDIO_FRAME_RATE;

/// Number of bytes in one canonical frame of s16-little-endian mono audio.
pub const MONO_FRAME_BYTE_SIZE: usize = MONO_FRAME_SIZE * std::mem::size_of::<i16>();

/// Frequency, in Hz, of the tone synthesized into a sourceless mix.
pub const FALLBACK_TONE_FREQ: f32 = 440.0;

/// Amplitude of the fallback tone, in the mixer's `[-1, 1]` domain.
///
/// Low enough to be unobtrusive, loud enough to confirm that the pipeline
/// and the far side's playback are alive.
pub const FALLBACK_TONE_AMPLITUDE: f32 = 0.05;

/// Amplitude of an injected test tone.
pub const TEST_TONE_AMPLITUDE: f32 = 0.3;

/// Length of an injected test tone.
pub const TEST_TONE_LEN: Duration = Duration::from_secs(1);

/// Delay before an injected test tone is detached from its mixer.
///
/// Slightly longer than [`TEST_TONE_LEN`] so the generator always ends
/// before its subscription is removed.
pub const TEST_TONE_LINGER: Duration = Duration::from_millis(1100);

/// Reserved source name under which a test tone is attached to a mixer.
pub const TEST_TONE_ID: &str = "__test_tone__";

/// Window in which a participant's inbound audio counts as recent.
pub const RECENT_AUDIO_WINDOW: Duration = Duration::from_secs(5);

/// Window in which a participant's inbound audio marks them as talking.
pub const TALKING_WINDOW: Duration = Duration::from_secs(1);
