#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! Partyline is an async audio conferencing hub for Rust: a selective
//! forwarding and mixing unit in which every participant uploads one
//! microphone stream and downloads exactly one stream, mixed for them
//! on the server.
//!
//! The library offers:
//!  * A per-listener [`mixer`] producing one canonical PCM frame per
//!    pull with strictly monotonic timestamps, equal-power level
//!    normalization, and a synthesized fallback tone while no one is
//!    speaking.
//!  * A [`source`] relay fanning one inbound track out to any number of
//!    independent, lag-skipping subscription cursors.
//!  * A [`routing`] table deciding who hears whom, full mesh by
//!    default, with per-listener selective overrides.
//!  * A [`hub`] tying peer connections, sources, routing, and mixers
//!    together through one serialized control path, with reconciliation
//!    on every join, leave, track arrival, and routing change.
//!  * Read-only [`stats`] counters and snapshots for the monitoring
//!    endpoints of an embedding server.
//!
//! The peer-connection layer itself (ICE, DTLS, codecs) stays behind
//! the traits in [`peer`]: the hub sees a black box which delivers one
//! remote audio track and accepts one local track to send. Adapters
//! for a concrete WebRTC stack implement those traits; the hub neither
//! knows nor cares which one.

#![warn(clippy::pedantic, rust_2018_idioms)]
#![allow(
    // Allowed as they are too pedantic
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

mod config;
pub mod constants;
pub mod error;
pub mod frame;
pub mod hub;
pub mod id;
pub mod mixer;
pub mod peer;
pub mod routing;
pub mod source;
pub mod stats;
#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::{
    config::Config,
    error::{ControlError, SignalError, TrackError},
    frame::{Frame, SampleData},
    hub::Hub,
    id::ParticipantId,
    mixer::{MixerHandle, MixerTrack, PlayMode},
    peer::{PeerConnector, PeerEvent, PeerSession, SessionDescription},
    routing::RoutingTable,
    source::{Source, SourceRead, Subscription},
};
