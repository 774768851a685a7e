//! Inbound audio sources and their fan-out subscriptions.
//!
//! Each participant uploads exactly one audio track, but any number of
//! listeners may mix it. [`Source`] is the relay in between: a single
//! pump task is the only reader of the raw inbound track, and every
//! listener consumes through an independent [`Subscription`] cursor.
//!
//! The relay is deliberately shallow. A lagging listener does not slow
//! the source or other listeners down; it skips stale frames and
//! resumes at the most recent one, trading occasional drops for bounded
//! latency.

mod subscription;

pub use subscription::{SourceRead, Subscription};

use crate::{error::TrackError, frame::Frame, id::ParticipantId, peer::InboundTrack, stats::SourceStats};
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, warn};

/// Pause between reads after a transient inbound failure.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub(crate) enum SourceItem {
    Frame(Frame),
    End,
}

/// Relay around one participant's inbound audio track.
///
/// Dropping the source, or calling [`end`], terminates every
/// subscription; dropping a subscription never affects the source.
///
/// [`end`]: Source::end
pub struct Source {
    id: ParticipantId,
    tx: broadcast::Sender<SourceItem>,
    stats: Arc<SourceStats>,
}

impl Source {
    /// Creates a relay for the given participant with a buffer of
    /// `depth` frames per subscription.
    #[must_use]
    pub fn new(id: ParticipantId, depth: usize, stats: Arc<SourceStats>) -> Self {
        let (tx, _) = broadcast::channel(depth.max(1));

        Self { id, tx, stats }
    }

    /// Id of the participant this source belongs to.
    #[must_use]
    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    /// Counters updated as frames pass through the relay.
    #[must_use]
    pub fn stats(&self) -> &Arc<SourceStats> {
        &self.stats
    }

    /// Opens a new independent cursor over this source.
    ///
    /// The cursor sees every frame produced from this moment on,
    /// subject to the relay's lag-skipping.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.id.clone(), self.tx.subscribe())
    }

    /// Pushes one frame to every live subscription.
    pub fn broadcast(&self, frame: Frame) {
        self.stats.note_frame();
        // An error here only means no cursor is currently listening.
        let _ = self.tx.send(SourceItem::Frame(frame));
    }

    /// Marks the source as finished; every subscription observes
    /// end-of-stream.
    pub fn end(&self) {
        let _ = self.tx.send(SourceItem::End);
    }

    /// Spawns the pump task: the sole reader of the raw inbound track.
    ///
    /// Transient read failures are logged and retried after a short
    /// backoff; track end and terminal failures finish the relay.
    pub(crate) fn spawn_pump(&self, mut track: Box<dyn InboundTrack>) -> JoinHandle<()> {
        let id = self.id.clone();
        let tx = self.tx.clone();
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            debug!("inbound relay started for {}", id);

            loop {
                match track.recv().await {
                    Ok(SourceRead::Frame(frame)) => {
                        stats.note_frame();
                        let _ = tx.send(SourceItem::Frame(frame));
                    },
                    Ok(SourceRead::Ended) => {
                        debug!("inbound track ended for {}", id);
                        break;
                    },
                    Err(TrackError::Transient(why)) => {
                        warn!("frame receive error for {}: {}", id, why);
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    },
                    Err(TrackError::Failed(why)) => {
                        warn!("inbound track failed for {}: {}", id, why);
                        break;
                    },
                }
            }

            let _ = tx.send(SourceItem::End);
            debug!("inbound relay stopped for {}", id);
        })
    }
}
