//! Hub control, source, and signalling error handling.

use crate::id::ParticipantId;
use std::{error::Error, fmt};

/// Error returned when the peer layer fails to deliver a frame from an
/// inbound track.
///
/// End-of-stream is not an error: it is reported through
/// [`SourceRead::Ended`].
///
/// [`SourceRead::Ended`]: crate::source::SourceRead::Ended
#[derive(Debug)]
#[non_exhaustive]
pub enum TrackError {
    /// A single read failed; the track may recover on the next pull.
    Transient(String),
    /// The track is permanently unreadable and will deliver no more frames.
    Failed(String),
}

impl fmt::Display for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackError::Transient(why) => write!(f, "transient track read failure: {}", why),
            TrackError::Failed(why) => write!(f, "track permanently unreadable: {}", why),
        }
    }
}

impl Error for TrackError {}

/// Error returned by hub control operations (routing changes, tone
/// injection, mixer lookup).
#[derive(Debug)]
#[non_exhaustive]
pub enum ControlError {
    /// The operation referenced a participant with no live session.
    ///
    /// Always safe to ignore: the operation was rejected as a no-op.
    UnknownParticipant(ParticipantId),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::UnknownParticipant(id) => {
                write!(f, "no live session for participant {}", id)
            },
        }
    }
}

impl Error for ControlError {}

/// Convenience type for hub control error handling.
pub type ControlResult<T> = Result<T, ControlError>;

/// Error surfaced to the signalling caller by [`Hub::accept_offer`].
///
/// These are the only errors that escape the hub; everything else is
/// contained and logged.
///
/// [`Hub::accept_offer`]: crate::hub::Hub::accept_offer
#[derive(Debug)]
#[non_exhaustive]
pub enum SignalError {
    /// The supplied session description was malformed, empty, or not an
    /// offer. No session was created.
    BadOffer(String),
    /// The claimed participant id is reserved or unusable.
    BadParticipant(String),
    /// The peer layer failed while negotiating.
    Peer(String),
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to accept offer: ")?;
        match self {
            SignalError::BadOffer(why) => write!(f, "bad session description: {}", why),
            SignalError::BadParticipant(why) => write!(f, "bad participant id: {}", why),
            SignalError::Peer(why) => write!(f, "peer connection failure: {}", why),
        }
    }
}

impl Error for SignalError {}

/// Convenience type for signalling error handling.
pub type SignalResult<T> = Result<T, SignalError>;
