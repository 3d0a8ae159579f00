//! Event bus: typed, in-process publish/subscribe
//!
//! Anyone may subscribe; only the registry, session manager and watcher
//! publish (`publish` is crate-private).
//!
//! | Topic | Published by | Payload |
//! |-------|--------------|---------|
//! | `wallet-changed` | registry | connected flag, address, provider |
//! | `session-changed` | session manager | new [`WalletSession`] |
//! | `session-ended` | session manager | identity that was torn down |
//! | `profile-loaded` | session manager | [`Profile`] for the current identity |
//! | `connection-lost` | watcher | provider, reason |
//! | `verification-requested` | watcher | - |

use crate::core::ProviderId;
use crate::session::{Profile, WalletSession};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    WalletChanged,
    SessionChanged,
    SessionEnded,
    ProfileLoaded,
    ConnectionLost,
    VerificationRequested,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::WalletChanged => "wallet-changed",
            Topic::SessionChanged => "session-changed",
            Topic::SessionEnded => "session-ended",
            Topic::ProfileLoaded => "profile-loaded",
            Topic::ConnectionLost => "connection-lost",
            Topic::VerificationRequested => "verification-requested",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalletEvent {
    WalletChanged { connected: bool, address: Option<String>, provider: Option<ProviderId> },
    SessionChanged { session: WalletSession },
    SessionEnded { provider: ProviderId, address: String },
    ProfileLoaded { profile: Profile },
    ConnectionLost { provider: Option<ProviderId>, reason: String },
    VerificationRequested,
}

impl WalletEvent {
    pub fn topic(&self) -> Topic {
        match self {
            WalletEvent::WalletChanged { .. } => Topic::WalletChanged,
            WalletEvent::SessionChanged { .. } => Topic::SessionChanged,
            WalletEvent::SessionEnded { .. } => Topic::SessionEnded,
            WalletEvent::ProfileLoaded { .. } => Topic::ProfileLoaded,
            WalletEvent::ConnectionLost { .. } => Topic::ConnectionLost,
            WalletEvent::VerificationRequested => Topic::VerificationRequested,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WalletEvent>,
}

impl Default for EventBus {
    fn default() -> Self { Self::new(64) }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns the number of subscribers that will see the event.
    pub(crate) fn publish(&self, event: WalletEvent) -> usize {
        tracing::debug!(topic = event.topic().as_str(), "publish");
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream { rx: self.sender.subscribe(), topics: None }
    }

    pub fn subscribe_to(&self, topics: &[Topic]) -> EventStream {
        EventStream { rx: self.sender.subscribe(), topics: Some(topics.to_vec()) }
    }

    pub fn subscriber_count(&self) -> usize { self.sender.receiver_count() }
}

pub struct EventStream {
    rx: broadcast::Receiver<WalletEvent>,
    topics: Option<Vec<Topic>>,
}

impl EventStream {
    fn wants(&self, event: &WalletEvent) -> bool {
        self.topics.as_ref().map_or(true, |t| t.contains(&event.topic()))
    }

    /// Next matching event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<WalletEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "event subscriber lagged"),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<WalletEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => tracing::warn!(skipped, "event subscriber lagged"),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain every queued matching event.
    pub fn drain(&mut self) -> Vec<WalletEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_filter() {
        let bus = EventBus::new(8);
        let mut all = bus.subscribe();
        let mut lost_only = bus.subscribe_to(&[Topic::ConnectionLost]);

        bus.publish(WalletEvent::VerificationRequested);
        bus.publish(WalletEvent::ConnectionLost { provider: Some(ProviderId::METAMASK), reason: "locked".into() });

        assert_eq!(all.drain().len(), 2);
        let events = lost_only.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].topic().as_str(), "connection-lost");
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(WalletEvent::VerificationRequested), 0);
    }

    #[test]
    fn lagged_subscriber_skips_ahead() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe();
        for _ in 0..5 {
            bus.publish(WalletEvent::VerificationRequested);
        }
        assert_eq!(slow.drain().len(), 2);
    }

    #[tokio::test]
    async fn recv_ends_when_bus_dropped() {
        let bus = EventBus::new(4);
        let mut stream = bus.subscribe();
        bus.publish(WalletEvent::VerificationRequested);
        drop(bus);
        assert_eq!(stream.recv().await, Some(WalletEvent::VerificationRequested));
        assert_eq!(stream.recv().await, None);
    }
}
