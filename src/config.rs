use crate::constants::*;
use std::time::Duration;

/// Configuration for hubs and the mixers they create.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Config {
    /// Longest a mixer waits on any one source per output tick.
    ///
    /// A source which does not deliver within this bound contributes
    /// silence for that tick. All sources are polled concurrently, so
    /// this also bounds the whole tick's wait.
    ///
    /// Defaults to one frame period (20 ms).
    pub source_wait: Duration,
    /// Depth of each source's relay buffer, in frames.
    ///
    /// Kept shallow on purpose: a lagging listener skips ahead to the
    /// most recent frame rather than accumulating latency.
    ///
    /// Defaults to `2`.
    pub relay_depth: usize,
    /// Whether a mixer with no subscribed sources synthesizes the
    /// low-amplitude 440 Hz fallback tone instead of emitting silence.
    ///
    /// Defaults to `true`.
    pub fallback_tone: bool,
    /// Window in which a participant's inbound audio counts as recent
    /// in stats snapshots.
    ///
    /// Defaults to 5 seconds.
    pub recent_audio_window: Duration,
    /// Interval between periodic stats log lines, if the logger task is
    /// spawned.
    ///
    /// Defaults to 10 seconds.
    pub stats_log_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_wait: TIMESTEP_LENGTH,
            relay_depth: 2,
            fallback_tone: true,
            recent_audio_window: RECENT_AUDIO_WINDOW,
            stats_log_interval: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Sets this `Config`'s per-source wait bound.
    #[must_use]
    pub fn source_wait(mut self, source_wait: Duration) -> Self {
        self.source_wait = source_wait;
        self
    }

    /// Sets this `Config`'s relay buffer depth.
    ///
    /// Values below `1` are clamped to `1`.
    #[must_use]
    pub fn relay_depth(mut self, relay_depth: usize) -> Self {
        self.relay_depth = relay_depth.max(1);
        self
    }

    /// Sets whether sourceless mixers emit the fallback tone.
    #[must_use]
    pub fn fallback_tone(mut self, fallback_tone: bool) -> Self {
        self.fallback_tone = fallback_tone;
        self
    }

    /// Sets this `Config`'s recent-audio window.
    #[must_use]
    pub fn recent_audio_window(mut self, recent_audio_window: Duration) -> Self {
        self.recent_audio_window = recent_audio_window;
        self
    }

    /// Sets this `Config`'s stats logging interval.
    #[must_use]
    pub fn stats_log_interval(mut self, stats_log_interval: Duration) -> Self {
        self.stats_log_interval = stats_log_interval;
        self
    }
}
