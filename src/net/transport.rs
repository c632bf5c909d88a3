//! Peer transport seam
//!
//! The actual data channels (WebRTC, websockets, ...) live outside this
//! crate; the session only needs a fire-and-forget sink for serialized
//! frames and a stream of connect/disconnect/frame events.

use tokio::sync::mpsc;

/// Opaque transport-level peer handle, assigned by the transport layer.
/// Distinct from [`PeerId`](crate::net::protocol::PeerId): the replica
/// identity is only learned from the frames a channel carries.
pub type TransportPeerId = String;

/// Events surfaced by the transport layer
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A data channel to a new peer opened
    Connected(TransportPeerId),

    /// A data channel closed; used for peer-departure detection
    Disconnected(TransportPeerId),

    /// A serialized frame arrived
    Frame { from: TransportPeerId, data: String },
}

/// Outbound half of a transport session. Sends never block and never report
/// delivery; a dropped frame is superseded by the next tick's publish.
pub trait FrameSink: Send {
    /// Broadcast a serialized frame to every directly-connected peer
    fn send(&self, frame: String);

    /// Send to a single peer; transports that cannot address individual
    /// peers fall back to broadcasting.
    fn send_to(&self, peer: &TransportPeerId, frame: String) {
        let _ = peer;
        self.send(frame);
    }
}

/// A live transport session for one lobby
pub struct TransportLink {
    pub sink: Box<dyn FrameSink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Entry point into the external transport: performs the rendezvous for a
/// lobby and hands back the live link.
pub trait TransportConnector {
    fn join(&mut self, lobby: &str, signaling_url: &str) -> Result<TransportLink, TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("lobby {0} unreachable: {1}")]
    Unreachable(String, String),

    #[error("transport session closed")]
    Closed,
}
