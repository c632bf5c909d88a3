//! In-memory transport hub
//!
//! Fans frames out between in-process replicas. Backs the sandbox binary
//! and the integration tests; the seam it implements is the same one a real
//! WebRTC transport plugs into.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::transport::{
    FrameSink, TransportConnector, TransportError, TransportEvent, TransportLink, TransportPeerId,
};

/// Process-local broadcast hub. Cloning shares the member table.
#[derive(Clone, Default)]
pub struct MemoryHub {
    members: Arc<DashMap<TransportPeerId, mpsc::UnboundedSender<TransportEvent>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector handle for one replica
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector { hub: self.clone() }
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    fn join(&self) -> TransportLink {
        let id: TransportPeerId = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        // introduce the newcomer and the existing members to each other
        for member in self.members.iter() {
            let _ = member.value().send(TransportEvent::Connected(id.clone()));
            let _ = tx.send(TransportEvent::Connected(member.key().clone()));
        }

        self.members.insert(id.clone(), tx);
        debug!(transport_peer = %id, members = self.members.len(), "replica joined hub");

        TransportLink {
            sink: Box::new(MemorySink {
                id,
                hub: self.clone(),
            }),
            events: rx,
        }
    }

    fn leave(&self, id: &TransportPeerId) {
        if self.members.remove(id).is_some() {
            debug!(transport_peer = %id, "replica left hub");
            for member in self.members.iter() {
                let _ = member.value().send(TransportEvent::Disconnected(id.clone()));
            }
        }
    }

    fn fan_out(&self, from: &TransportPeerId, frame: String) {
        for member in self.members.iter() {
            if member.key() == from {
                continue;
            }
            let _ = member.value().send(TransportEvent::Frame {
                from: from.clone(),
                data: frame.clone(),
            });
        }
    }

    fn send_one(&self, from: &TransportPeerId, to: &TransportPeerId, frame: String) {
        if let Some(member) = self.members.get(to) {
            let _ = member.value().send(TransportEvent::Frame {
                from: from.clone(),
                data: frame,
            });
        }
    }
}

pub struct MemoryConnector {
    hub: MemoryHub,
}

impl TransportConnector for MemoryConnector {
    fn join(&mut self, lobby: &str, _signaling_url: &str) -> Result<TransportLink, TransportError> {
        debug!(lobby = lobby, "joining in-memory hub");
        Ok(self.hub.join())
    }
}

struct MemorySink {
    id: TransportPeerId,
    hub: MemoryHub,
}

impl FrameSink for MemorySink {
    fn send(&self, frame: String) {
        self.hub.fan_out(&self.id, frame);
    }

    fn send_to(&self, peer: &TransportPeerId, frame: String) {
        self.hub.send_one(&self.id, peer, frame);
    }
}

impl Drop for MemorySink {
    fn drop(&mut self) {
        self.hub.leave(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_fan_out_to_other_members_only() {
        tokio_test::block_on(async {
            let hub = MemoryHub::new();
            let mut a = hub.connector().join("lobby", "").unwrap();
            let mut b = hub.connector().join("lobby", "").unwrap();

            // b learns about a at join time
            assert!(matches!(
                b.events.recv().await,
                Some(TransportEvent::Connected(_))
            ));
            // a learns about b when b joins
            assert!(matches!(
                a.events.recv().await,
                Some(TransportEvent::Connected(_))
            ));

            a.sink.send("hello".to_string());
            match b.events.recv().await {
                Some(TransportEvent::Frame { data, .. }) => assert_eq!(data, "hello"),
                other => panic!("expected frame, got {other:?}"),
            }
            // the sender never hears its own broadcast
            assert!(a.events.try_recv().is_err());
        });
    }

    #[test]
    fn dropping_the_sink_announces_departure() {
        tokio_test::block_on(async {
            let hub = MemoryHub::new();
            let a = hub.connector().join("lobby", "").unwrap();
            let mut b = hub.connector().join("lobby", "").unwrap();
            let _ = b.events.recv().await;

            drop(a);
            assert_eq!(hub.member_count(), 1);
            assert!(matches!(
                b.events.recv().await,
                Some(TransportEvent::Disconnected(_))
            ));
        });
    }

    async fn next_frame(link: &mut TransportLink) -> (TransportPeerId, String) {
        loop {
            match link.events.recv().await {
                Some(TransportEvent::Frame { from, data }) => return (from, data),
                Some(_) => continue,
                None => panic!("hub channel closed"),
            }
        }
    }

    #[test]
    fn send_to_targets_one_member() {
        tokio_test::block_on(async {
            let hub = MemoryHub::new();
            let a = hub.connector().join("lobby", "").unwrap();
            let mut b = hub.connector().join("lobby", "").unwrap();
            let mut c = hub.connector().join("lobby", "").unwrap();

            // learn c's transport id by observing a broadcast from it
            c.sink.send("probe".to_string());
            let (c_id, _) = next_frame(&mut b).await;

            a.sink.send_to(&c_id, "direct".to_string());
            let (_, data) = next_frame(&mut c).await;
            assert_eq!(data, "direct");

            // b saw the probe broadcast but never the direct frame
            b.sink.send("flush".to_string());
            let (_, data) = next_frame(&mut c).await;
            assert_eq!(data, "flush");
            assert!(b.events.try_recv().is_err());
        });
    }
}
