//! Per-listener mixing tracks.
//!
//! Every listener owns exactly one [`MixerTrack`]: the outbound audio
//! track their peer connection pulls frames from. On each pull, the
//! track gathers one frame from every subscribed source, folds them
//! into a single canonical frame with equal-power normalization, and
//! advances its presentation timestamp by one frame. The output stream
//! never stalls and never skips a timestamp, whatever the sources do.
//!
//! Control flows through a [`MixerHandle`] as messages on a mailbox,
//! drained at the top of each tick. That drain is the tick's snapshot:
//! source changes never interleave with a mix in progress, and handle
//! operations are safe to call from any task at any time.

pub(crate) mod tone;

use crate::{
    config::Config,
    constants::*,
    frame::Frame,
    id::ParticipantId,
    source::{SourceRead, Subscription},
    stats::{MixerStats, MixerStatsSnapshot},
};
use flume::{Receiver, Sender, TryRecvError};
use futures::future;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::time::timeout;
use tracing::debug;

/// Play status of a mixer track.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum PlayMode {
    /// The mixer is live and producing frames. Entered at construction.
    Play,
    /// The mixer has been stopped and cannot be restarted.
    Stop,
}

impl PlayMode {
    /// Returns whether the mixer has irreversibly stopped.
    #[must_use]
    pub fn is_done(self) -> bool {
        matches!(self, PlayMode::Stop)
    }
}

impl Default for PlayMode {
    fn default() -> Self {
        PlayMode::Play
    }
}

enum MixerMessage {
    AddSource(ParticipantId, Subscription),
    RemoveSource(ParticipantId),
    Stop,
}

/// Creates a connected control handle and pull track for one listener.
///
/// The mixer is live from this moment: the track produces a valid frame
/// on its very first pull, falling back to the synthesized tone until
/// sources are attached.
#[must_use]
pub fn create(owner: ParticipantId, config: &Config) -> (MixerHandle, MixerTrack) {
    let (tx, rx) = flume::unbounded();
    let mirror = Arc::new(Mutex::new(HashSet::new()));
    let stats = Arc::new(MixerStats::new());

    debug!("mixer created for {}", owner);

    let handle = MixerHandle {
        owner: owner.clone(),
        tx,
        mirror: Arc::clone(&mirror),
        stats: Arc::clone(&stats),
    };
    let track = MixerTrack {
        owner,
        rx,
        sources: HashMap::new(),
        stalled: HashSet::new(),
        mirror,
        stats,
        source_wait: config.source_wait,
        fallback_tone: config.fallback_tone,
        pts: 0,
        playing: PlayMode::Play,
    };

    (handle, track)
}

/// Control half of a mixer.
///
/// All operations are idempotent and safe to call concurrently with
/// ticks on the corresponding [`MixerTrack`].
#[derive(Clone)]
pub struct MixerHandle {
    owner: ParticipantId,
    tx: Sender<MixerMessage>,
    mirror: Arc<Mutex<HashSet<ParticipantId>>>,
    stats: Arc<MixerStats>,
}

impl MixerHandle {
    /// The listener this mixer belongs to.
    #[must_use]
    pub fn owner(&self) -> &ParticipantId {
        &self.owner
    }

    /// Attaches a source subscription, replacing any prior subscription
    /// under the same id.
    ///
    /// Returns `false` if the mixer has already stopped.
    pub fn add_source(&self, id: ParticipantId, subscription: Subscription) -> bool {
        self.mirror.lock().insert(id.clone());
        self.tx
            .send(MixerMessage::AddSource(id, subscription))
            .is_ok()
    }

    /// Detaches a source. A no-op for ids that are not attached.
    ///
    /// Returns `false` if the mixer has already stopped.
    pub fn remove_source(&self, id: &ParticipantId) -> bool {
        self.mirror.lock().remove(id);
        self.tx.send(MixerMessage::RemoveSource(id.clone())).is_ok()
    }

    /// Ids of the currently attached sources, sorted.
    #[must_use]
    pub fn sources(&self) -> Vec<ParticipantId> {
        let mut out: Vec<_> = self.mirror.lock().iter().cloned().collect();
        out.sort();
        out
    }

    /// Whether `id` is currently attached.
    #[must_use]
    pub fn has_source(&self, id: &ParticipantId) -> bool {
        self.mirror.lock().contains(id)
    }

    /// Stops the mixer. Terminal and idempotent.
    pub fn stop(&self) {
        self.stats.set_started(false);
        let _ = self.tx.send(MixerMessage::Stop);
    }

    /// Counters updated as the mixer emits frames.
    #[must_use]
    pub fn stats(&self) -> &Arc<MixerStats> {
        &self.stats
    }

    /// Current stats snapshot, including the attached source ids.
    #[must_use]
    pub fn snapshot(&self) -> MixerStatsSnapshot {
        self.stats.snapshot(self.sources())
    }
}

/// Pull half of a mixer: the outbound audio track for one listener.
///
/// The sender attached to the listener's peer connection owns this
/// object and sets the pull cadence; `recv` itself never sleeps beyond
/// the bounded per-source wait.
pub struct MixerTrack {
    owner: ParticipantId,
    rx: Receiver<MixerMessage>,
    sources: HashMap<ParticipantId, Subscription>,
    stalled: HashSet<ParticipantId>,
    mirror: Arc<Mutex<HashSet<ParticipantId>>>,
    stats: Arc<MixerStats>,
    source_wait: Duration,
    fallback_tone: bool,
    pts: u64,
    playing: PlayMode,
}

impl MixerTrack {
    /// The listener this mixer belongs to.
    #[must_use]
    pub fn owner(&self) -> &ParticipantId {
        &self.owner
    }

    /// Current play status.
    #[must_use]
    pub fn play_state(&self) -> PlayMode {
        self.playing
    }

    /// Produces the next mixed frame, or `None` once the mixer has
    /// stopped.
    ///
    /// Each call emits exactly one frame whose timestamp follows the
    /// previous frame's by 960 samples. Sources that fail to deliver
    /// within the configured bound contribute silence for this tick;
    /// sources that have ended are detached after the tick.
    pub async fn recv(&mut self) -> Option<Frame> {
        if self.playing.is_done() {
            return None;
        }
        self.apply_control();
        if self.playing.is_done() {
            return None;
        }

        let mut mix = [0.0f32; MONO_FRAME_SIZE];
        let mut active = 0usize;
        let mut finished = Vec::new();

        if self.sources.is_empty() {
            if self.fallback_tone {
                tone::fill(&mut mix, self.pts, FALLBACK_TONE_AMPLITUDE);
                active = 1;
            }
        } else {
            let wait = self.source_wait;
            let pulls = self
                .sources
                .iter_mut()
                .map(|(id, sub)| async move { (id, timeout(wait, sub.recv()).await) });

            for (id, pulled) in future::join_all(pulls).await {
                match pulled {
                    Ok(SourceRead::Frame(frame)) => {
                        frame.mix_into(&mut mix);
                        active += 1;
                        self.stalled.remove(id);
                    },
                    Ok(SourceRead::Ended) => {
                        finished.push(id.clone());
                    },
                    Err(_elapsed) => {
                        // Log the first miss per source, then stay quiet
                        // until it delivers again.
                        if self.stalled.insert(id.clone()) {
                            debug!("source {} missed its frame deadline for {}", id, self.owner);
                        }
                    },
                }
            }
        }

        let amplitude = mix.iter().map(|s| s.abs()).sum::<f32>() / MONO_FRAME_SIZE as f32;

        if active > 1 {
            let gain = 1.0 / (active as f32).sqrt();
            for slot in mix.iter_mut() {
                *slot *= gain;
            }
        }

        let frame = Frame::canonical(self.pts, &mix);
        self.pts += MONO_FRAME_SIZE as u64;
        self.stats.note_frame(amplitude);

        for id in finished {
            if self.sources.remove(&id).is_some() {
                self.mirror.lock().remove(&id);
                debug!("detaching ended source {} from mixer for {}", id, self.owner);
            }
        }

        Some(frame)
    }

    fn apply_control(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(MixerMessage::AddSource(id, sub)) => {
                    debug!("attaching source {} to mixer for {}", id, self.owner);
                    self.sources.insert(id, sub);
                },
                Ok(MixerMessage::RemoveSource(id)) => {
                    if self.sources.remove(&id).is_some() {
                        debug!("detaching source {} from mixer for {}", id, self.owner);
                    }
                    self.stalled.remove(&id);
                },
                Ok(MixerMessage::Stop) | Err(TryRecvError::Disconnected) => {
                    self.shutdown();
                    break;
                },
                Err(TryRecvError::Empty) => break,
            }
        }
    }

    fn shutdown(&mut self) {
        if !self.playing.is_done() {
            debug!("mixer for {} stopped", self.owner);
        }
        self.playing = PlayMode::Stop;
        self.sources.clear();
        self.stalled.clear();
        self.mirror.lock().clear();
        self.stats.set_started(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::SampleData,
        source::Source,
        stats::SourceStats,
    };

    fn new_source(id: &str) -> Source {
        Source::new(
            ParticipantId::from(id),
            8,
            Arc::new(SourceStats::new()),
        )
    }

    fn sine_frame(pts: u64, freq: f64, amplitude: f32) -> Frame {
        let step = freq * std::f64::consts::TAU / SAMPLE_RATE_RAW as f64;
        let mut buf = [0.0f32; MONO_FRAME_SIZE];
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = amplitude * (step * (pts + i as u64) as f64).sin() as f32;
        }
        Frame::canonical(pts, &buf)
    }

    fn samples(frame: &Frame) -> &[i16] {
        match &frame.data {
            SampleData::S16(s) => s,
            SampleData::F32(_) => panic!("mixer output must be s16"),
        }
    }

    fn rms(frame: &Frame) -> f64 {
        let sum: f64 = samples(frame)
            .iter()
            .map(|s| {
                let f = f64::from(*s) / 32_768.0;
                f * f
            })
            .sum();
        (sum / MONO_FRAME_SIZE as f64).sqrt()
    }

    fn quick_config() -> Config {
        Config::default().source_wait(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn sourceless_mixer_emits_the_fallback_tone() {
        let (_handle, mut track) = create(ParticipantId::from("alice"), &Config::default());

        for i in 0..3u64 {
            let frame = track.recv().await.expect("mixer is live");
            assert_eq!(frame.pts, i * MONO_FRAME_SIZE as u64);
            assert!(samples(&frame).iter().any(|s| *s != 0));
        }

        assert_eq!(track.stats.frames_emitted(), 3);
    }

    #[tokio::test]
    async fn fallback_tone_can_be_disabled() {
        let (_handle, mut track) = create(
            ParticipantId::from("alice"),
            &Config::default().fallback_tone(false),
        );

        let frame = track.recv().await.expect("mixer is live");
        assert!(samples(&frame).iter().all(|s| *s == 0));
    }

    #[tokio::test]
    async fn pts_stays_unbroken_across_source_changes() {
        let (handle, mut track) = create(ParticipantId::from("alice"), &quick_config());
        let bob = new_source("bob");
        let carol = new_source("carol");

        let mut want = 0u64;

        // Sourceless first.
        assert_eq!(track.recv().await.unwrap().pts, want);
        want += MONO_FRAME_SIZE as u64;

        // Attach bob mid-stream.
        bob.broadcast(sine_frame(0, 440.0, 0.5));
        handle.add_source(ParticipantId::from("bob"), bob.subscribe());
        bob.broadcast(sine_frame(960, 440.0, 0.5));
        assert_eq!(track.recv().await.unwrap().pts, want);
        want += MONO_FRAME_SIZE as u64;

        // Attach carol, then detach bob.
        carol.broadcast(sine_frame(0, 880.0, 0.5));
        handle.add_source(ParticipantId::from("carol"), carol.subscribe());
        carol.broadcast(sine_frame(960, 880.0, 0.5));
        bob.broadcast(sine_frame(1920, 440.0, 0.5));
        assert_eq!(track.recv().await.unwrap().pts, want);
        want += MONO_FRAME_SIZE as u64;

        handle.remove_source(&ParticipantId::from("bob"));
        carol.broadcast(sine_frame(1920, 880.0, 0.5));
        assert_eq!(track.recv().await.unwrap().pts, want);

        assert_eq!(handle.sources(), vec![ParticipantId::from("carol")]);
    }

    #[tokio::test]
    async fn equal_power_normalization_keeps_levels_stable() {
        let amplitude = 0.5f32;
        let single_rms = f64::from(amplitude) / 2.0f64.sqrt();

        let (handle, mut track) = create(ParticipantId::from("alice"), &quick_config());

        for &(name, freq) in [
            ("s1", 440.0),
            ("s2", 1_000.0),
            ("s3", 2_100.0),
            ("s4", 3_300.0),
        ]
        .iter()
        {
            let src = new_source(name);
            let sub = src.subscribe();
            src.broadcast(sine_frame(0, freq, amplitude));
            handle.add_source(ParticipantId::from(name), sub);
        }

        let frame = track.recv().await.expect("mixer is live");
        let got = rms(&frame);

        assert!(
            (got - single_rms).abs() < single_rms * 0.1,
            "mixed rms {} strayed from single-source rms {}",
            got,
            single_rms
        );
    }

    #[tokio::test]
    async fn stalled_source_contributes_silence_at_full_cadence() {
        let (handle, mut track) = create(ParticipantId::from("alice"), &quick_config());

        let live = new_source("live");
        let stalled = new_source("stalled");
        handle.add_source(ParticipantId::from("live"), live.subscribe());
        handle.add_source(ParticipantId::from("stalled"), stalled.subscribe());

        for i in 0..5u64 {
            live.broadcast(sine_frame(i * 960, 440.0, 0.5));
            let frame = track.recv().await.expect("mixer is live");
            assert_eq!(frame.pts, i * MONO_FRAME_SIZE as u64);
            assert!(samples(&frame).iter().any(|s| *s != 0));
        }

        assert_eq!(track.stats.frames_emitted(), 5);
        // The stalled source stays attached; it only contributed silence.
        assert!(handle.has_source(&ParticipantId::from("stalled")));
    }

    #[tokio::test]
    async fn ended_source_is_detached_after_the_tick() {
        let (handle, mut track) = create(ParticipantId::from("alice"), &quick_config());

        let bob = new_source("bob");
        handle.add_source(ParticipantId::from("bob"), bob.subscribe());
        bob.broadcast(sine_frame(0, 440.0, 0.5));
        bob.end();

        // The buffered frame still mixes on this tick.
        let frame = track.recv().await.expect("mixer is live");
        assert!(samples(&frame).iter().any(|s| *s != 0));
        assert!(handle.has_source(&ParticipantId::from("bob")));

        // The next tick observes the end and detaches.
        track.recv().await.expect("mixer is live");
        assert!(!handle.has_source(&ParticipantId::from("bob")));
        assert!(handle.sources().is_empty());
    }

    #[tokio::test]
    async fn source_changes_are_idempotent() {
        let (handle, mut track) = create(ParticipantId::from("alice"), &quick_config());
        let bob = new_source("bob");

        handle.add_source(ParticipantId::from("bob"), bob.subscribe());
        handle.add_source(ParticipantId::from("bob"), bob.subscribe());
        assert_eq!(handle.sources(), vec![ParticipantId::from("bob")]);

        bob.broadcast(sine_frame(0, 440.0, 0.5));
        track.recv().await.expect("mixer is live");
        assert_eq!(track.sources.len(), 1);

        handle.remove_source(&ParticipantId::from("bob"));
        handle.remove_source(&ParticipantId::from("bob"));
        track.recv().await.expect("mixer is live");
        assert!(track.sources.is_empty());
    }

    #[tokio::test]
    async fn stop_is_terminal() {
        let (handle, mut track) = create(ParticipantId::from("alice"), &quick_config());

        assert!(track.recv().await.is_some());
        handle.stop();
        assert!(track.recv().await.is_none());
        assert!(track.recv().await.is_none());
        assert!(track.play_state().is_done());
        assert!(!handle.stats().is_started());
    }

    #[tokio::test]
    async fn dropping_every_handle_stops_the_track() {
        let (handle, mut track) = create(ParticipantId::from("alice"), &quick_config());
        drop(handle);

        assert!(track.recv().await.is_none());
    }
}
