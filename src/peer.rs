//! Interfaces onto the peer-connection layer.
//!
//! The hub never touches ICE, DTLS, or codecs. It sees a peer
//! connection as a black box which delivers one remote audio track,
//! accepts one local audio track to send, and reports its connection
//! state. Adapters implement these traits over a concrete WebRTC stack;
//! the hub's tests implement them over channels.

use crate::{
    error::{SignalResult, TrackError},
    id::ParticipantId,
    mixer::MixerTrack,
    source::SourceRead,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Session description in the JSON wire form exchanged with clients:
/// `{"sdp": "...", "type": "offer"}`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SessionDescription {
    /// Raw SDP body.
    pub sdp: String,
    /// Whether this description is an offer or an answer.
    #[serde(rename = "type")]
    pub kind: SdpKind,
}

impl SessionDescription {
    /// Builds an offer description.
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpKind::Offer,
        }
    }

    /// Builds an answer description.
    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpKind::Answer,
        }
    }
}

/// Role of a session description in the offer/answer exchange.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// The remote side's proposal. The hub only ever receives these.
    Offer,
    /// The hub's reply. The hub only ever produces these.
    Answer,
}

/// Connection state reported by the peer layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum PeerState {
    /// Freshly created, not yet negotiating.
    New,
    /// Negotiation or ICE checks in progress.
    Connecting,
    /// Media is flowing.
    Connected,
    /// Connectivity lost.
    Disconnected,
    /// ICE gave up.
    Failed,
    /// Locally or remotely closed.
    Closed,
}

impl PeerState {
    /// Whether this state ends the session. A terminal transition
    /// unregisters the participant.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PeerState::Disconnected | PeerState::Failed | PeerState::Closed
        )
    }
}

/// Event pushed by the peer layer to the hub.
pub enum PeerEvent {
    /// The remote side attached its microphone track.
    InboundTrack(Box<dyn InboundTrack>),
    /// The connection state moved.
    StateChange(PeerState),
}

/// One inbound (remote) audio track.
///
/// The hub guarantees a single reader: exactly one relay pump pulls
/// from this track for its whole life.
#[async_trait]
pub trait InboundTrack: Send {
    /// Pulls the next frame.
    ///
    /// Natural end of the track is [`SourceRead::Ended`];
    /// [`TrackError`] is reserved for genuine failures.
    async fn recv(&mut self) -> Result<SourceRead, TrackError>;
}

/// Handle onto one peer connection, owned by the hub for the life of a
/// session.
///
/// Implementations must tolerate the hub's call order: remote
/// description first, then the outbound track, then the answer. `close`
/// may be called at any time, repeatedly.
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Applies the client's offer as the remote description.
    async fn set_remote_description(&self, offer: SessionDescription) -> SignalResult<()>;

    /// Installs the listener's mixed output as the track this
    /// connection sends. The sender takes ownership and dictates the
    /// pull cadence from here on.
    fn attach_outbound(&self, track: MixerTrack);

    /// Creates the local answer and applies it as the local
    /// description.
    async fn create_answer(&self) -> SignalResult<SessionDescription>;

    /// Current connection state.
    fn state(&self) -> PeerState;

    /// Tears the connection down. Best-effort and idempotent.
    async fn close(&self) -> SignalResult<()>;

    /// The event stream for this connection. Consumed once, by the
    /// hub's per-session pump.
    fn events(&self) -> flume::Receiver<PeerEvent>;
}

/// Factory building peer sessions for accepted offers.
pub trait PeerConnector: Send + Sync {
    /// Creates a fresh, unnegotiated peer session for `participant`.
    fn connect(&self, participant: &ParticipantId) -> SignalResult<Arc<dyn PeerSession>>;
}
