use super::SourceItem;
use crate::{frame::Frame, id::ParticipantId};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::trace;

/// Result of one read from a subscription or inbound track.
///
/// End-of-stream is an ordinary value, not an error: once `Ended` has
/// been observed, every later read returns `Ended` again.
#[derive(Debug)]
#[non_exhaustive]
pub enum SourceRead {
    /// The next available frame.
    Frame(Frame),
    /// The source has finished; no further frames will arrive.
    Ended,
}

/// Independent read cursor over one source track.
///
/// Cursors never interfere with each other: a slow cursor skips frames
/// it could not keep up with, and dropping a cursor is O(1) and leaves
/// the source untouched.
pub struct Subscription {
    source: ParticipantId,
    rx: broadcast::Receiver<SourceItem>,
    live: bool,
}

impl Subscription {
    pub(crate) fn new(source: ParticipantId, rx: broadcast::Receiver<SourceItem>) -> Self {
        Self {
            source,
            rx,
            live: true,
        }
    }

    /// Id of the participant this cursor reads from.
    #[must_use]
    pub fn source(&self) -> &ParticipantId {
        &self.source
    }

    /// Waits for the next frame.
    ///
    /// If the cursor has fallen behind the relay buffer, stale frames
    /// are skipped and the read resumes at the most recent retained
    /// frame.
    pub async fn recv(&mut self) -> SourceRead {
        if !self.live {
            return SourceRead::Ended;
        }

        loop {
            match self.rx.recv().await {
                Ok(SourceItem::Frame(frame)) => return SourceRead::Frame(frame),
                Ok(SourceItem::End) | Err(RecvError::Closed) => {
                    self.live = false;
                    return SourceRead::Ended;
                },
                Err(RecvError::Lagged(skipped)) => {
                    trace!("cursor on {} skipped {} stale frames", self.source, skipped);
                },
            }
        }
    }
}
