//! Stand-in for "the user's realtime channel" (spec explicitly treats the
//! actual websocket/SSE fan-out to browser clients as an external
//! collaborator). The Trigger Sink publishes onto this sender; a real
//! deployment wires a websocket gateway onto the subscriber side, the way
//! `rustrade::infrastructure::binance::websocket` wires a raw feed into a
//! `broadcast::Sender`.

use crate::domain::events::TriggerPayload;
use tokio::sync::broadcast;
use tracing::warn;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct RealtimeSink {
    tx: broadcast::Sender<TriggerPayload>,
}

impl RealtimeSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TriggerPayload> {
        self.tx.subscribe()
    }

    /// Best-effort publish: a lagging or absent subscriber never blocks or
    /// fails the Trigger Sink (spec §4.J step 2 is best-effort).
    pub fn publish(&self, payload: TriggerPayload) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        if let Err(err) = self.tx.send(payload) {
            warn!("realtime sink: no active receivers ({err})");
        }
    }
}

impl Default for RealtimeSink {
    fn default() -> Self {
        Self::new()
    }
}
