//! Live counters and read-only monitoring snapshots.
//!
//! Counters are written from the media path and read concurrently by
//! monitoring callers; readers accept eventual consistency. Snapshot
//! types serialize into the JSON bodies served by the HTTP layer.

use crate::{id::ParticipantId, peer::PeerState};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

fn unix_secs(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Counters tracking one participant's inbound audio.
///
/// Updated by the source relay on every received frame.
#[derive(Debug, Default)]
pub struct SourceStats {
    packets: AtomicU64,
    last_audio: Mutex<Option<SystemTime>>,
}

impl SourceStats {
    /// Creates a zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn note_frame(&self) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        *self.last_audio.lock() = Some(SystemTime::now());
    }

    /// Number of frames received from this participant so far.
    #[must_use]
    pub fn packet_count(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    /// Time since the last received frame, if any frame has arrived.
    #[must_use]
    pub fn last_audio_ago(&self) -> Option<Duration> {
        let last = (*self.last_audio.lock())?;
        last.elapsed().ok()
    }

    /// Snapshot in the shape served per participant by the user-listing
    /// endpoint.
    #[must_use]
    pub fn snapshot(&self, recent_window: Duration, talking_window: Duration) -> UserAudioStats {
        let ago = self.last_audio_ago();

        UserAudioStats {
            packet_count: self.packet_count(),
            last_audio_ago: ago.map(|d| d.as_secs_f64()),
            has_recent_audio: ago.map_or(false, |d| d < recent_window),
            is_talking: ago.map_or(false, |d| d < talking_window),
        }
    }
}

#[derive(Debug, Default)]
struct MixerClock {
    last_emit: Option<SystemTime>,
    amplitude_sum: f64,
}

/// Counters tracking one mixer's output.
#[derive(Debug, Default)]
pub struct MixerStats {
    frames: AtomicU64,
    started: AtomicBool,
    clock: Mutex<MixerClock>,
}

impl MixerStats {
    pub(crate) fn new() -> Self {
        let out = Self::default();
        out.started.store(true, Ordering::Relaxed);
        out
    }

    pub(crate) fn note_frame(&self, amplitude: f32) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        let mut clock = self.clock.lock();
        clock.last_emit = Some(SystemTime::now());
        clock.amplitude_sum += f64::from(amplitude);
    }

    pub(crate) fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::Relaxed);
    }

    /// Number of frames this mixer has emitted.
    #[must_use]
    pub fn frames_emitted(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Whether the mixer is still producing frames.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    /// Mean absolute amplitude over all emitted frames.
    #[must_use]
    pub fn avg_amplitude(&self) -> f64 {
        let frames = self.frames_emitted().max(1);
        self.clock.lock().amplitude_sum / frames as f64
    }

    /// Snapshot in the shape served by the monitoring endpoint.
    #[must_use]
    pub fn snapshot(&self, sources: Vec<ParticipantId>) -> MixerStatsSnapshot {
        let last_activity = self.clock.lock().last_emit.map(unix_secs);

        MixerStatsSnapshot {
            frames_sent: self.frames_emitted(),
            sources,
            last_activity,
            avg_amplitude: self.avg_amplitude(),
            started: self.is_started(),
        }
    }
}

/// Per-participant inbound audio stats, as served by the user-listing
/// endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UserAudioStats {
    /// Frames received from this participant so far.
    pub packet_count: u64,
    /// Seconds since the last received frame, if any.
    pub last_audio_ago: Option<f64>,
    /// Whether audio arrived within the recent-audio window.
    pub has_recent_audio: bool,
    /// Whether audio arrived within the talking window.
    pub is_talking: bool,
}

/// Per-mixer stats, as served by the monitoring endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MixerStatsSnapshot {
    /// Frames this mixer has emitted.
    pub frames_sent: u64,
    /// Ids of the sources currently feeding the mix.
    pub sources: Vec<ParticipantId>,
    /// Unix timestamp of the last emitted frame, if any.
    pub last_activity: Option<f64>,
    /// Mean absolute amplitude over all emitted frames.
    pub avg_amplitude: f64,
    /// Whether the mixer is still producing frames.
    pub started: bool,
}

/// Connection state of one peer, as served by the monitoring endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeerStateSnapshot {
    /// Reported peer connection state.
    pub connection_state: PeerState,
}

/// Full registry snapshot, as served by the debug endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DebugSnapshot {
    /// Every registered participant.
    pub peers: Vec<ParticipantId>,
    /// Participants whose inbound track has arrived.
    pub incoming_tracks: Vec<ParticipantId>,
    /// Participants with a live outbound mixer.
    pub outgoing_tracks: Vec<ParticipantId>,
    /// The routing table: listener to the sources they hear.
    pub routing_table: BTreeMap<ParticipantId, Vec<ParticipantId>>,
    /// Each mixer's currently subscribed source ids.
    pub mixer_sources: BTreeMap<ParticipantId, Vec<ParticipantId>>,
}

/// Point-in-time monitoring snapshot across all sessions.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    /// Unix timestamp of the snapshot.
    pub timestamp: f64,
    /// Per-mixer output stats.
    pub mixers: BTreeMap<ParticipantId, MixerStatsSnapshot>,
    /// Per-participant inbound audio stats.
    pub incoming_audio: BTreeMap<ParticipantId, UserAudioStats>,
    /// Per-peer connection states.
    pub peer_states: BTreeMap<ParticipantId, PeerStateSnapshot>,
}

impl MonitorSnapshot {
    pub(crate) fn stamp() -> f64 {
        unix_secs(SystemTime::now())
    }
}

/// Acknowledgement returned by test-tone injection.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToneReceipt {
    /// Always `"success"` for a delivered tone.
    pub status: String,
    /// Human-readable confirmation.
    pub message: String,
    /// Human-readable tone length.
    pub duration: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_stats_report_recency() {
        let stats = SourceStats::new();
        let snap = stats.snapshot(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(snap.packet_count, 0);
        assert!(snap.last_audio_ago.is_none());
        assert!(!snap.has_recent_audio);
        assert!(!snap.is_talking);

        stats.note_frame();
        stats.note_frame();
        let snap = stats.snapshot(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(snap.packet_count, 2);
        assert!(snap.has_recent_audio);
        assert!(snap.is_talking);
    }

    #[test]
    fn mixer_stats_average_amplitude() {
        let stats = MixerStats::new();
        assert!(stats.is_started());

        stats.note_frame(0.2);
        stats.note_frame(0.4);
        let snap = stats.snapshot(vec![ParticipantId::from("alice")]);
        assert_eq!(snap.frames_sent, 2);
        assert!((snap.avg_amplitude - 0.3).abs() < 1e-6);
        assert!(snap.last_activity.is_some());
        assert_eq!(snap.sources, vec![ParticipantId::from("alice")]);
    }
}
