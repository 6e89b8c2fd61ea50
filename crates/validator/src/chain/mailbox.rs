// Path: crates/validator/src/chain/mailbox.rs
//! Bounded component mailboxes.

use kestrel_telemetry::sinks::MailboxMetricsSink;
use kestrel_types::error::ChainError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// The sending half of a component's queue.
///
/// Peer traffic goes through a bounded lane: posting never waits, and a full
/// lane rejects the message and counts the rejection. Control messages from
/// the node itself (L1 events, ACS/DSS/VM completions, hand-offs between the
/// loops) use an unbounded lane and are only refused once the loop is gone.
pub struct Mailbox<T> {
    name: &'static str,
    peers: mpsc::Sender<T>,
    control: mpsc::UnboundedSender<T>,
    metrics: Arc<dyn MailboxMetricsSink>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            peers: self.peers.clone(),
            control: self.control.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("name", &self.name)
            .field("free", &self.peers.capacity())
            .finish()
    }
}

/// The receiving half. Control messages are taken before peer messages.
#[derive(Debug)]
pub struct Inbox<T> {
    peers: mpsc::Receiver<T>,
    control: mpsc::UnboundedReceiver<T>,
}

impl<T> Inbox<T> {
    /// The next message, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<T> {
        tokio::select! {
            biased;
            Some(msg) = self.control.recv() => Some(msg),
            Some(msg) = self.peers.recv() => Some(msg),
            else => None,
        }
    }
}

/// Creates a mailbox named `name` whose peer lane holds at most `capacity`
/// messages.
pub fn channel<T>(
    name: &'static str,
    capacity: usize,
    metrics: Arc<dyn MailboxMetricsSink>,
) -> (Mailbox<T>, Inbox<T>) {
    let (peers_tx, peers_rx) = mpsc::channel(capacity.max(1));
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    (
        Mailbox {
            name,
            peers: peers_tx,
            control: control_tx,
            metrics,
        },
        Inbox {
            peers: peers_rx,
            control: control_rx,
        },
    )
}

impl<T> Mailbox<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queues a message that arrived from a peer.
    pub fn post(&self, msg: T) -> Result<(), ChainError> {
        match self.peers.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.metrics.inc_mailbox_rejections(self.name);
                tracing::warn!(target: "chain", mailbox = self.name, "mailbox full, message dropped");
                Err(ChainError::MailboxFull(self.name))
            }
            Err(TrySendError::Closed(_)) => Err(ChainError::Closed),
        }
    }

    /// Queues a control message. It is never rejected for lack of room.
    pub fn post_control(&self, msg: T) -> Result<(), ChainError> {
        self.control.send(msg).map_err(|_| ChainError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct Rejections(Mutex<Vec<&'static str>>);

    impl MailboxMetricsSink for Rejections {
        fn inc_mailbox_rejections(&self, mailbox: &'static str) {
            self.0.lock().push(mailbox);
        }
    }

    #[tokio::test]
    async fn a_full_mailbox_rejects_and_counts() {
        let metrics = Arc::new(Rejections::default());
        let (mb, mut inbox) = channel::<u32>("consensus", 2, metrics.clone());
        mb.post(1).unwrap();
        mb.post(2).unwrap();
        assert!(matches!(mb.post(3), Err(ChainError::MailboxFull("consensus"))));
        assert_eq!(*metrics.0.lock(), vec!["consensus"]);

        assert_eq!(inbox.recv().await, Some(1));
        mb.post(4).unwrap();
        drop(inbox);
        assert!(matches!(mb.post(5), Err(ChainError::Closed)));
        assert!(matches!(mb.post_control(6), Err(ChainError::Closed)));
    }

    #[tokio::test]
    async fn control_messages_pass_a_full_peer_lane() {
        let metrics = Arc::new(Rejections::default());
        let (mb, mut inbox) = channel::<u32>("statemgr", 1, metrics.clone());
        mb.post(1).unwrap();
        assert!(mb.post(2).is_err());
        for i in 10..20 {
            mb.post_control(i).unwrap();
        }
        assert_eq!(*metrics.0.lock(), vec!["statemgr"]);

        let mut seen = Vec::new();
        for _ in 0..11 {
            seen.push(inbox.recv().await.unwrap());
        }
        assert_eq!(seen, vec![10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 1]);

        drop(mb);
        assert_eq!(inbox.recv().await, None);
    }
}
