use parking_lot::Mutex;
use strata_core::model::{IceTrickle, PeerType};
use tokio::sync::mpsc;

#[derive(Default)]
struct RoleQueue {
    history: Vec<IceTrickle>,
    consumers: Vec<mpsc::UnboundedSender<IceTrickle>>,
}

impl RoleQueue {
    fn push(&mut self, candidate: IceTrickle) {
        self.consumers
            .retain(|consumer| consumer.send(candidate.clone()).is_ok());
        self.history.push(candidate);
    }

    fn replay(&mut self) -> mpsc::UnboundedReceiver<IceTrickle> {
        let (tx, rx) = mpsc::unbounded_channel();
        for candidate in &self.history {
            let _ = tx.send(candidate.clone());
        }
        self.consumers.push(tx);
        rx
    }
}

/// Trickled candidates received from the SFU, kept per peer role.
///
/// Append-only for the transport; consumers get the full backlog followed by live arrivals, in
/// arrival order.
#[derive(Default)]
pub struct IceCandidateBuffer {
    publisher: Mutex<RoleQueue>,
    subscriber: Mutex<RoleQueue>,
}

impl IceCandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, role: PeerType) -> &Mutex<RoleQueue> {
        match role {
            PeerType::Publisher => &self.publisher,
            PeerType::Subscriber => &self.subscriber,
        }
    }

    pub fn push(&self, candidate: IceTrickle) {
        self.queue(candidate.peer_type).lock().push(candidate);
    }

    /// Replays every buffered candidate for `role`, then keeps delivering new ones.
    pub fn subscribe(&self, role: PeerType) -> mpsc::UnboundedReceiver<IceTrickle> {
        self.queue(role).lock().replay()
    }

    pub fn len(&self, role: PeerType) -> usize {
        self.queue(role).lock().history.len()
    }

    pub fn is_empty(&self, role: PeerType) -> bool {
        self.len(role) == 0
    }

    /// Disconnects all consumers. Buffered entries stay in place.
    pub fn close(&self) {
        self.publisher.lock().consumers.clear();
        self.subscriber.lock().consumers.clear();
    }
}
