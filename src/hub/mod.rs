//! The session registry and signalling glue.
//!
//! [`Hub`] is the one object an embedding server talks to. It keeps
//! peer connections, inbound sources, routing entries, and per-listener
//! mixers mutually consistent as participants come and go, and it does
//! so through a single serialized control path: every mutation runs
//! under one async mutex, with reconciliation applied before the lock
//! is released. Monitoring counters live outside that lock and may be
//! read at any time.

use crate::{
    config::Config,
    constants::*,
    error::{ControlError, ControlResult, SignalError, SignalResult},
    id::ParticipantId,
    mixer::{self, MixerHandle, MixerTrack},
    peer::{InboundTrack, PeerConnector, PeerEvent, PeerSession, SdpKind, SessionDescription},
    routing::RoutingTable,
    source::Source,
    stats::{
        DebugSnapshot,
        MonitorSnapshot,
        PeerStateSnapshot,
        SourceStats,
        ToneReceipt,
        UserAudioStats,
    },
};
use dashmap::DashMap;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
        Weak,
    },
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

struct Session {
    epoch: u64,
    peer: Arc<dyn PeerSession>,
    inbound: Option<Source>,
    mixer: MixerHandle,
    tasks: Vec<JoinHandle<()>>,
}

async fn teardown(session: Session) {
    if let Err(e) = session.peer.close().await {
        warn!("error closing peer connection: {}", e);
    }
    session.mixer.stop();
    for task in &session.tasks {
        task.abort();
    }
}

#[derive(Default)]
struct HubInner {
    sessions: HashMap<ParticipantId, Session>,
    routing: RoutingTable,
}

impl HubInner {
    /// Makes `listener`'s subscription set equal to its routing entry,
    /// intersected with the sources whose inbound track exists.
    ///
    /// The test tone is attached directly rather than routed, so it is
    /// never removed here.
    fn reconcile(&self, listener: &ParticipantId) {
        let session = match self.sessions.get(listener) {
            Some(session) => session,
            None => return,
        };

        let desired = self
            .routing
            .sources_for(listener)
            .cloned()
            .unwrap_or_default();
        let current: HashSet<ParticipantId> = session.mixer.sources().into_iter().collect();

        for id in current.difference(&desired) {
            if id.as_str() == TEST_TONE_ID {
                continue;
            }
            session.mixer.remove_source(id);
        }

        for id in desired.difference(&current) {
            if let Some(source) = self.sessions.get(id).and_then(|s| s.inbound.as_ref()) {
                session.mixer.add_source(id.clone(), source.subscribe());
            }
        }
    }

    fn reconcile_all(&self) {
        for listener in self.sessions.keys() {
            self.reconcile(listener);
        }
    }

    /// Resubscribes every routed listener to `source_id`'s current
    /// inbound source, replacing subscriptions to any earlier incarnation.
    fn fan_in(&self, source_id: &ParticipantId) {
        let source = match self.sessions.get(source_id).and_then(|s| s.inbound.as_ref()) {
            Some(source) => source,
            None => return,
        };

        for listener in self.routing.listeners_hearing(source_id) {
            if let Some(session) = self.sessions.get(&listener) {
                debug!("{} will hear {}", listener, source_id);
                session.mixer.add_source(source_id.clone(), source.subscribe());
            }
        }
    }
}

/// The audio hub: registry, router, and mixer supervisor in one.
///
/// Cheap to share behind an [`Arc`]; all methods take `&self`.
pub struct Hub {
    inner: Mutex<HubInner>,
    connector: Arc<dyn PeerConnector>,
    source_stats: DashMap<ParticipantId, Arc<SourceStats>>,
    config: Config,
    epochs: AtomicU64,
}

impl Hub {
    /// Creates a hub with default configuration.
    #[must_use]
    pub fn new(connector: Arc<dyn PeerConnector>) -> Arc<Self> {
        Self::from_config(connector, Config::default())
    }

    /// Creates a hub with the given configuration.
    #[must_use]
    pub fn from_config(connector: Arc<dyn PeerConnector>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HubInner::default()),
            connector,
            source_stats: DashMap::new(),
            config,
            epochs: AtomicU64::new(0),
        })
    }

    /// The configuration this hub was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accepts a client's SDP offer and returns the hub's answer.
    ///
    /// On success the participant is registered with a live mixer
    /// attached as the connection's outbound track. On any failure no
    /// session remains.
    ///
    /// The negotiation order is deliberate: register first, then apply
    /// the remote description, then attach the outbound track, then
    /// create the answer. Some peer stacks require exactly this
    /// sequence.
    pub async fn accept_offer(
        self: &Arc<Self>,
        id: ParticipantId,
        offer: SessionDescription,
    ) -> SignalResult<SessionDescription> {
        if offer.kind != SdpKind::Offer {
            return Err(SignalError::BadOffer("expected an offer".into()));
        }
        if offer.sdp.trim().is_empty() {
            return Err(SignalError::BadOffer("empty sdp".into()));
        }
        if id.as_str().is_empty() || id.as_str() == TEST_TONE_ID {
            return Err(SignalError::BadParticipant(format!(
                "{:?} is not a usable participant id",
                id.as_str()
            )));
        }

        info!("negotiating session for {}", id);
        let peer = self.connector.connect(&id)?;

        let track = self.register(id.clone(), Arc::clone(&peer)).await;

        if let Err(e) = peer.set_remote_description(offer).await {
            self.unregister(&id).await;
            return Err(e);
        }

        // Between remote description and answer, as some stacks require.
        peer.attach_outbound(track);

        match peer.create_answer().await {
            Ok(answer) => {
                debug!("answer created for {}", id);
                Ok(answer)
            },
            Err(e) => {
                self.unregister(&id).await;
                Err(e)
            },
        }
    }

    /// Registers a participant with an already-created peer session,
    /// returning the mixer track to attach as the connection's outbound
    /// track.
    ///
    /// If the id is already registered, the prior session is fully torn
    /// down before the new one is inserted.
    pub async fn register(
        self: &Arc<Self>,
        id: ParticipantId,
        peer: Arc<dyn PeerSession>,
    ) -> MixerTrack {
        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed) + 1;
        let pump = spawn_peer_pump(Arc::downgrade(self), id.clone(), epoch, peer.events());

        let mut inner = self.inner.lock().await;
        info!("registering participant {}", id);

        if let Some(old) = inner.sessions.remove(&id) {
            info!("closing replaced session for {}", id);
            inner.routing.on_leave(&id);
            self.source_stats.remove(&id);
            teardown(old).await;
        }

        let (handle, track) = mixer::create(id.clone(), &self.config);
        self.source_stats
            .insert(id.clone(), Arc::new(SourceStats::new()));
        inner.sessions.insert(
            id.clone(),
            Session {
                epoch,
                peer,
                inbound: None,
                mixer: handle,
                tasks: vec![pump],
            },
        );
        inner.routing.on_join(&id);
        inner.reconcile_all();

        info!(
            "participant {} registered ({} total)",
            id,
            inner.sessions.len()
        );
        track
    }

    /// Removes a participant and releases every resource tied to their
    /// session. Idempotent; returns whether a session was removed.
    pub async fn unregister(&self, id: &ParticipantId) -> bool {
        let mut inner = self.inner.lock().await;
        let session = match inner.sessions.remove(id) {
            Some(session) => session,
            None => return false,
        };

        info!("unregistering participant {}", id);
        inner.routing.on_leave(id);
        self.source_stats.remove(id);
        teardown(session).await;
        inner.reconcile_all();

        info!(
            "participant {} unregistered ({} remaining)",
            id,
            inner.sessions.len()
        );
        true
    }

    /// Installs the inbound audio track the peer layer reported for
    /// `id`, and subscribes every listener routed to hear them.
    ///
    /// A delivery that lost a race against an unregister, or against a
    /// rejoin under the same id, is dropped: `epoch` must match the
    /// live session.
    pub(crate) async fn set_inbound_track(
        &self,
        id: &ParticipantId,
        epoch: u64,
        track: Box<dyn InboundTrack>,
    ) {
        let mut inner = self.inner.lock().await;
        let session = match inner.sessions.get_mut(id) {
            Some(session) if session.epoch == epoch => session,
            Some(_) => {
                debug!("dropping stale inbound track for {}", id);
                return;
            },
            None => {
                debug!("dropping inbound track for unregistered {}", id);
                return;
            },
        };

        let stats = {
            let entry = self
                .source_stats
                .entry(id.clone())
                .or_insert_with(|| Arc::new(SourceStats::new()));
            Arc::clone(entry.value())
        };
        let source = Source::new(id.clone(), self.config.relay_depth, stats);
        session.tasks.push(source.spawn_pump(track));
        session.inbound = Some(source);
        info!("inbound audio track registered for {}", id);

        inner.fan_in(id);
    }

    /// Replaces `listener`'s routing entry and reconciles their mixer.
    ///
    /// Sources without a live session are dropped from the requested
    /// set.
    pub async fn set_routing(
        &self,
        listener: &ParticipantId,
        sources: HashSet<ParticipantId>,
    ) -> ControlResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.sessions.contains_key(listener) {
            return Err(ControlError::UnknownParticipant(listener.clone()));
        }

        let known: HashSet<ParticipantId> = sources
            .into_iter()
            .filter(|source| inner.sessions.contains_key(source))
            .collect();
        inner.routing.set(listener, known);
        inner.reconcile(listener);

        Ok(())
    }

    /// Plays one second of 440 Hz tone into the caller's own mix.
    ///
    /// The tone is attached directly to the caller's mixer under the
    /// reserved id, bypassing the routing table, and detaches itself
    /// shortly after it ends. No other listener hears it.
    pub async fn inject_test_tone(&self, id: &ParticipantId) -> ControlResult<ToneReceipt> {
        let inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get(id)
            .ok_or_else(|| ControlError::UnknownParticipant(id.clone()))?;

        let tone_id = ParticipantId::from(TEST_TONE_ID);
        let source = Source::new(
            tone_id.clone(),
            self.config.relay_depth,
            Arc::new(SourceStats::new()),
        );
        session.mixer.add_source(tone_id.clone(), source.subscribe());
        let _ = mixer::tone::spawn_tone_feed(source, TEST_TONE_LEN, TEST_TONE_AMPLITUDE);
        info!("test tone attached to the mix for {}", id);

        let mixer = session.mixer.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(TEST_TONE_LINGER).await;
            mixer.remove_source(&tone_id);
            debug!("test tone detached from the mix for {}", mixer.owner());
        });

        Ok(ToneReceipt {
            status: "success".into(),
            message: format!("Test tone sent directly to {}", id),
            duration: "1 second".into(),
        })
    }

    /// Ids of every registered participant, sorted.
    pub async fn active_participants(&self) -> Vec<ParticipantId> {
        let inner = self.inner.lock().await;
        let mut out: Vec<ParticipantId> = inner.sessions.keys().cloned().collect();
        out.sort();
        out
    }

    /// Control handle of `id`'s mixer, if they are registered.
    pub async fn mixer(&self, id: &ParticipantId) -> Option<MixerHandle> {
        let inner = self.inner.lock().await;
        inner.sessions.get(id).map(|session| session.mixer.clone())
    }

    /// Per-participant inbound audio stats.
    ///
    /// Reads the live counters without touching the control path.
    #[must_use]
    pub fn audio_stats(&self) -> BTreeMap<ParticipantId, UserAudioStats> {
        self.source_stats
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry
                        .value()
                        .snapshot(self.config.recent_audio_window, TALKING_WINDOW),
                )
            })
            .collect()
    }

    /// Full registry snapshot for debugging.
    pub async fn debug_snapshot(&self) -> DebugSnapshot {
        let inner = self.inner.lock().await;

        let mut peers: Vec<ParticipantId> = inner.sessions.keys().cloned().collect();
        peers.sort();
        let mut incoming_tracks: Vec<ParticipantId> = inner
            .sessions
            .iter()
            .filter(|(_, session)| session.inbound.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        incoming_tracks.sort();
        let mixer_sources = inner
            .sessions
            .iter()
            .map(|(id, session)| (id.clone(), session.mixer.sources()))
            .collect();

        DebugSnapshot {
            outgoing_tracks: peers.clone(),
            peers,
            incoming_tracks,
            routing_table: inner.routing.snapshot(),
            mixer_sources,
        }
    }

    /// Point-in-time monitoring snapshot across all sessions.
    pub async fn monitor_snapshot(&self) -> MonitorSnapshot {
        let inner = self.inner.lock().await;
        let mixers = inner
            .sessions
            .iter()
            .map(|(id, session)| (id.clone(), session.mixer.snapshot()))
            .collect();
        let peer_states = inner
            .sessions
            .iter()
            .map(|(id, session)| {
                (
                    id.clone(),
                    PeerStateSnapshot {
                        connection_state: session.peer.state(),
                    },
                )
            })
            .collect();
        drop(inner);

        MonitorSnapshot {
            timestamp: MonitorSnapshot::stamp(),
            mixers,
            incoming_audio: self.audio_stats(),
            peer_states,
        }
    }

    /// Spawns a task logging audio stats and the routing table at the
    /// configured interval. The task ends when the hub is dropped.
    pub fn spawn_stats_logger(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::downgrade(self);
        let period = self.config.stats_log_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let hub = match hub.upgrade() {
                    Some(hub) => hub,
                    None => break,
                };

                let stats = hub.audio_stats();
                if stats.is_empty() {
                    debug!("no active audio connections");
                    continue;
                }

                for (id, stat) in &stats {
                    info!(
                        "{}: {} packets, recent audio: {}",
                        id, stat.packet_count, stat.has_recent_audio
                    );
                }
                for (listener, sources) in hub.inner.lock().await.routing.snapshot() {
                    info!("{} hears: {:?}", listener, sources);
                }
            }
        })
    }
}

/// Drains one peer session's events into the hub.
///
/// Terminal connection states unregister the participant and end the
/// pump; so does the hub itself going away.
fn spawn_peer_pump(
    hub: Weak<Hub>,
    id: ParticipantId,
    epoch: u64,
    events: flume::Receiver<PeerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(event) = events.recv_async().await {
            let hub = match hub.upgrade() {
                Some(hub) => hub,
                None => break,
            };

            match event {
                PeerEvent::InboundTrack(track) => {
                    hub.set_inbound_track(&id, epoch, track).await;
                },
                PeerEvent::StateChange(state) => {
                    debug!("peer state for {}: {:?}", id, state);
                    if state.is_terminal() {
                        info!("cleaning up connection for {} ({:?})", id, state);
                        hub.unregister(&id).await;
                        break;
                    }
                },
            }
        }
    })
}
