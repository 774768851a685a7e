#![allow(missing_docs)]
//! Deterministic peer and track doubles for driving the hub in tests.

use crate::{
    constants::*,
    error::{SignalError, SignalResult, TrackError},
    frame::Frame,
    id::ParticipantId,
    mixer::MixerTrack,
    peer::{
        InboundTrack,
        PeerConnector,
        PeerEvent,
        PeerSession,
        PeerState,
        SessionDescription,
    },
    source::SourceRead,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Polls a condition until it holds, panicking after a second of trying.
macro_rules! wait_until {
    ($cond:expr) => {
        for _ in 0..200u32 {
            if $cond {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!($cond, "condition not reached in time");
    };
}
pub(crate) use wait_until;

pub fn sine_frame(pts: u64, freq: f64, amplitude: f32) -> Frame {
    let step = freq * std::f64::consts::TAU / SAMPLE_RATE_RAW as f64;
    let mut buf = [0.0f32; MONO_FRAME_SIZE];
    for (i, slot) in buf.iter_mut().enumerate() {
        *slot = amplitude * (step * (pts + i as u64) as f64).sin() as f32;
    }
    Frame::canonical(pts, &buf)
}

/// Inbound track producing an endless paced sine tone.
pub struct SineTrack {
    freq: f64,
    amplitude: f32,
    pace: Duration,
    pts: u64,
}

impl SineTrack {
    pub fn endless(freq: f64, amplitude: f32, pace: Duration) -> Self {
        Self {
            freq,
            amplitude,
            pace,
            pts: 0,
        }
    }
}

#[async_trait]
impl InboundTrack for SineTrack {
    async fn recv(&mut self) -> Result<SourceRead, TrackError> {
        tokio::time::sleep(self.pace).await;
        let frame = sine_frame(self.pts, self.freq, self.amplitude);
        self.pts += MONO_FRAME_SIZE as u64;
        Ok(SourceRead::Frame(frame))
    }
}

/// Inbound track that never delivers anything.
pub struct StalledTrack;

#[async_trait]
impl InboundTrack for StalledTrack {
    async fn recv(&mut self) -> Result<SourceRead, TrackError> {
        futures::future::pending().await
    }
}

/// Scripted peer session recording the hub's negotiation calls.
///
/// Offers whose SDP contains `"malformed"` are rejected at
/// `set_remote_description`, mimicking an unparseable description.
pub struct MockPeer {
    calls: Mutex<Vec<&'static str>>,
    outbound: Mutex<Option<MixerTrack>>,
    state: Mutex<PeerState>,
    closed: AtomicBool,
    events_tx: flume::Sender<PeerEvent>,
    events_rx: flume::Receiver<PeerEvent>,
}

impl MockPeer {
    pub fn new() -> Arc<Self> {
        let (events_tx, events_rx) = flume::unbounded();

        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            outbound: Mutex::new(None),
            state: Mutex::new(PeerState::New),
            closed: AtomicBool::new(false),
            events_tx,
            events_rx,
        })
    }

    /// Delivers an inbound track to the hub, as a connected browser
    /// would when its microphone starts.
    pub fn push_track(&self, track: impl InboundTrack + 'static) {
        let _ = self
            .events_tx
            .send(PeerEvent::InboundTrack(Box::new(track)));
    }

    /// Reports a connection state change to the hub.
    pub fn push_state(&self, state: PeerState) {
        *self.state.lock() = state;
        let _ = self.events_tx.send(PeerEvent::StateChange(state));
    }

    /// Takes the outbound mixer track the hub attached, if any.
    pub fn take_outbound(&self) -> Option<MixerTrack> {
        self.outbound.lock().take()
    }

    pub fn has_outbound(&self) -> bool {
        self.outbound.lock().is_some()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PeerSession for MockPeer {
    async fn set_remote_description(&self, offer: SessionDescription) -> SignalResult<()> {
        self.calls.lock().push("set_remote_description");
        if offer.sdp.contains("malformed") {
            return Err(SignalError::BadOffer("unparseable sdp".into()));
        }
        Ok(())
    }

    fn attach_outbound(&self, track: MixerTrack) {
        self.calls.lock().push("attach_outbound");
        *self.outbound.lock() = Some(track);
    }

    async fn create_answer(&self) -> SignalResult<SessionDescription> {
        self.calls.lock().push("create_answer");
        Ok(SessionDescription::answer("v=0 mock answer"))
    }

    fn state(&self) -> PeerState {
        *self.state.lock()
    }

    async fn close(&self) -> SignalResult<()> {
        self.closed.store(true, Ordering::Relaxed);
        *self.state.lock() = PeerState::Closed;
        Ok(())
    }

    fn events(&self) -> flume::Receiver<PeerEvent> {
        self.events_rx.clone()
    }
}

/// Connector handing out [`MockPeer`]s and remembering them by
/// participant, so tests can reach the peer behind each session.
///
/// A re-register under the same id replaces the remembered peer; the
/// evicted one is returned by [`replaced`].
///
/// [`replaced`]: MockConnector::replaced
#[derive(Default)]
pub struct MockConnector {
    peers: Mutex<HashMap<ParticipantId, Arc<MockPeer>>>,
    evicted: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn peer(&self, id: &str) -> Arc<MockPeer> {
        Arc::clone(
            self.peers
                .lock()
                .get(&ParticipantId::from(id))
                .expect("no peer connected under that id"),
        )
    }

    pub fn replaced(&self) -> Vec<Arc<MockPeer>> {
        self.evicted.lock().clone()
    }
}

impl PeerConnector for MockConnector {
    fn connect(&self, participant: &ParticipantId) -> SignalResult<Arc<dyn PeerSession>> {
        let peer = MockPeer::new();
        if let Some(old) = self
            .peers
            .lock()
            .insert(participant.clone(), Arc::clone(&peer))
        {
            self.evicted.lock().push(old);
        }
        Ok(peer)
    }
}
