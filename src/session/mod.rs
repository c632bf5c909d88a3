//! Session context
//!
//! One explicit handle owning the shared document, the awareness channel
//! and the transport link for a single game session. Constructed once and
//! passed by handle into the reconciliation loop and the UI layer; there is
//! no hidden module-level state.
//!
//! All operations here are synchronous, in-memory reads and writes against
//! the local replica; propagation to remote replicas is fire-and-forget.
//! Remote changes are applied when the loop pumps the transport queue, at
//! the boundary between ticks, never in the middle of a read.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::net::protocol::{
    decode_payload, encode_payload, AudioContent, ChatEntry, Frame, InputContent, MailboxState,
    PeerId, ResolutionMessage, TextContent, UsernameContent, Vec2,
};
use crate::net::transport::{TransportConnector, TransportEvent, TransportLink, TransportPeerId};
use crate::sync::awareness::{AwarenessChannel, PresenceRecord};
use crate::sync::doc::SharedDocument;
use crate::util::time::unix_millis;

/// Direct-messaging event surfaced to the reconciliation loop
#[derive(Debug, Clone)]
pub enum DirectEvent {
    Input { from: PeerId, content: InputContent },
    Position { from: PeerId, content: Vec2 },
    Message { from: PeerId, content: String },
    Whiteboard { content: String },
}

/// Shared handle: the loop and the UI layer each hold a clone
pub type SharedSession = Arc<Mutex<SessionContext>>;

pub struct SessionContext {
    doc: SharedDocument,
    awareness: AwarenessChannel,
    /// `None` when the transport could not be established: local-only mode
    link: Option<TransportLink>,
    /// Transport channel -> replica identity, learned from received frames;
    /// used to turn channel closures into awareness departures
    routes: HashMap<TransportPeerId, PeerId>,
    username: String,
}

impl SessionContext {
    /// Join a lobby. Establishing the transport session is a side effect of
    /// construction; if the connector fails the session still works in
    /// local-only mode (no remote convergence, peer list stays empty) and
    /// gameplay is not blocked.
    pub fn connect(config: &Config, connector: &mut dyn TransportConnector) -> Self {
        Self::connect_with_doc(config, connector, SharedDocument::new())
    }

    pub(crate) fn connect_with_doc(
        config: &Config,
        connector: &mut dyn TransportConnector,
        doc: SharedDocument,
    ) -> Self {
        let link = match connector.join(&config.lobby_name, &config.signaling_url) {
            Ok(link) => Some(link),
            Err(e) => {
                warn!(
                    lobby = %config.lobby_name,
                    error = %e,
                    "transport unavailable, running local-only"
                );
                None
            }
        };

        let mut awareness = AwarenessChannel::new(doc.client_id());
        awareness.set_username(UsernameContent {
            username: config.username.clone(),
        });
        awareness.enable();

        info!(
            client_id = doc.client_id(),
            lobby = %config.lobby_name,
            connected = link.is_some(),
            "session established"
        );

        Self {
            doc,
            awareness,
            link,
            routes: HashMap::new(),
            username: config.username.clone(),
        }
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn local_identity(&self) -> PeerId {
        self.doc.client_id()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Known peers as advertised through awareness; never includes self
    pub fn known_peers(&self) -> HashMap<PeerId, PresenceRecord> {
        self.awareness.peers().clone()
    }

    /// Snapshot for iteration while the caller also mutates the session
    pub fn presence_snapshot(&self) -> Vec<(PeerId, PresenceRecord)> {
        self.awareness
            .peers()
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect()
    }

    /// Final cleanup after the loop handled a departure
    pub fn forget_peer(&mut self, peer: PeerId) {
        self.awareness.forget(peer);
    }

    // --- transport plumbing ---

    fn broadcast(&self, frame: &Frame) {
        let Some(link) = &self.link else { return };
        match frame.encode() {
            Ok(raw) => link.sink.send(raw),
            Err(e) => warn!(error = %e, "failed to encode frame"),
        }
    }

    fn send_to(&self, peer: &TransportPeerId, frame: &Frame) {
        let Some(link) = &self.link else { return };
        match frame.encode() {
            Ok(raw) => link.sink.send_to(peer, raw),
            Err(e) => warn!(error = %e, "failed to encode frame"),
        }
    }

    /// Push pending local document changes to the mesh
    fn flush_doc(&mut self) {
        let Some(update) = self.doc.take_update() else {
            return;
        };
        self.broadcast(&Frame::DocUpdate {
            update: encode_payload(&update),
        });
    }

    /// Drain transport events. Document and awareness changes are applied
    /// immediately; direct-messaging frames are handed back for the loop.
    pub fn pump(&mut self) -> Vec<DirectEvent> {
        let mut out = Vec::new();
        loop {
            let event = match self.link.as_mut() {
                Some(link) => link.events.try_recv().ok(),
                None => None,
            };
            let Some(event) = event else { break };
            match event {
                TransportEvent::Connected(peer) => self.handle_connected(peer),
                TransportEvent::Disconnected(peer) => self.handle_disconnected(peer),
                TransportEvent::Frame { from, data } => self.handle_frame(from, data, &mut out),
            }
        }
        out
    }

    fn handle_connected(&mut self, peer: TransportPeerId) {
        debug!(transport_peer = %peer, "peer channel connected");

        // ask the newcomer for everything we are missing
        let request = Frame::SyncStep1 {
            from: self.local_identity(),
            state_vector: encode_payload(&self.doc.state_vector()),
        };
        self.send_to(&peer, &request);

        // and advertise ourselves right away instead of waiting one tick
        if let Some(frame) = self.awareness.publish() {
            self.send_to(&peer, &frame);
        }
    }

    fn handle_disconnected(&mut self, peer: TransportPeerId) {
        if let Some(client_id) = self.routes.remove(&peer) {
            info!(peer_id = client_id, "peer departed");
            self.awareness.mark_removed(client_id);
        }
    }

    fn handle_frame(&mut self, from: TransportPeerId, data: String, out: &mut Vec<DirectEvent>) {
        let frame = match Frame::decode(&data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "dropping malformed frame");
                return;
            }
        };

        match frame {
            Frame::SyncStep1 {
                from: peer_id,
                state_vector,
            } => {
                self.routes.insert(from.clone(), peer_id);
                let reply = decode_payload(&state_vector)
                    .ok()
                    .and_then(|sv| self.doc.diff_for(&sv).ok());
                match reply {
                    Some(diff) => self.send_to(
                        &from,
                        &Frame::SyncStep2 {
                            update: encode_payload(&diff),
                        },
                    ),
                    None => debug!(transport_peer = %from, "dropping malformed sync request"),
                }
            }
            Frame::SyncStep2 { update } | Frame::DocUpdate { update } => {
                match decode_payload(&update) {
                    Ok(bytes) => {
                        if let Err(e) = self.doc.apply_update(&bytes) {
                            warn!(error = %e, "dropping malformed document update");
                        }
                    }
                    Err(e) => debug!(error = %e, "dropping malformed update payload"),
                }
            }
            Frame::Awareness {
                from: peer_id,
                state,
            } => {
                self.routes.insert(from, peer_id);
                self.awareness.apply_remote(peer_id, state);
            }
            Frame::Input { from, content } => out.push(DirectEvent::Input { from, content }),
            Frame::Position { from, content } => out.push(DirectEvent::Position { from, content }),
            Frame::Message { from, content } => out.push(DirectEvent::Message { from, content }),
            Frame::Whiteboard { content, .. } => out.push(DirectEvent::Whiteboard { content }),
        }
    }

    // --- per-tick publication ---

    /// Publish local state for one tick: expire the chat bubble, stage
    /// position/input, broadcast the awareness frame plus the direct
    /// position and input frames, and flush any pending document changes.
    pub fn publish_local(&mut self, position: Vec2, input: InputContent, now_ms: u64) {
        if self.awareness.take_expired_text(now_ms) {
            // the durable log gets a soft retraction marker; the entry that
            // carried the text stays untouched
            self.append_chat_entry(String::new(), 0);
        }

        self.awareness.set_position(position);
        self.awareness.set_input(input.clone());
        if let Some(frame) = self.awareness.publish() {
            self.broadcast(&frame);
        }

        let from = self.local_identity();
        self.broadcast(&Frame::Position {
            from,
            content: position,
        });
        self.broadcast(&Frame::Input {
            from,
            content: input,
        });

        self.flush_doc();
    }

    // --- chat and UI surface ---

    /// Append to the durable chat log and stage the live bubble text
    pub fn send_chat(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let now = unix_millis();
        self.awareness.set_text(
            TextContent {
                text: text.to_string(),
                timestamp: now,
            },
            now,
        );
        self.append_chat_entry(text.to_string(), now);
    }

    fn append_chat_entry(&mut self, text: String, timestamp: u64) {
        let entry = ChatEntry {
            author_id: self.local_identity(),
            username: self.username.clone(),
            text,
            timestamp,
        };
        self.doc.append_chat(entry);
        self.flush_doc();
    }

    pub fn chat_log(&self) -> Vec<ChatEntry> {
        self.doc.chat_log()
    }

    pub fn observe_chat_log(&mut self, callback: impl FnMut(&[ChatEntry]) + Send + 'static) {
        self.doc.observe_chat_log(callback);
    }

    pub fn observe_mailboxes(
        &mut self,
        callback: impl FnMut(&HashMap<PeerId, MailboxState>) + Send + 'static,
    ) {
        self.doc.observe_mailboxes(callback);
    }

    /// Advertise the local audio stream and its mute flag
    pub fn set_audio(&mut self, stream_id: &str, muted: bool) {
        self.awareness.set_audio(AudioContent {
            stream_id: stream_id.to_string(),
            muted,
        });
    }

    /// Share a whiteboard link over the direct messaging path
    pub fn broadcast_whiteboard(&mut self, link: &str) {
        let from = self.local_identity();
        self.broadcast(&Frame::Whiteboard {
            from,
            content: link.to_string(),
        });
    }

    /// Low-latency direct chat/emote frame, outside the durable log
    pub fn broadcast_message(&mut self, content: &str) {
        let from = self.local_identity();
        self.broadcast(&Frame::Message {
            from,
            content: content.to_string(),
        });
    }

    // --- mailbox surface ---

    /// Queue a resolution message for a peer and flush it to the mesh
    pub fn deliver(&mut self, target: PeerId, message: ResolutionMessage) {
        self.doc.deliver(target, message);
        self.flush_doc();
    }

    pub fn drain_own_mailbox(&self) -> Vec<ResolutionMessage> {
        self.doc.drain_own_mailbox()
    }

    pub fn clear_own_mailbox(&mut self) {
        self.doc.clear_own_mailbox();
        self.flush_doc();
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        // best-effort retraction; the transport disconnect covers the rest
        let frame = self.awareness.retract();
        self.broadcast(&frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::memory::MemoryHub;
    use crate::net::transport::TransportError;
    use crate::util::time::CHAT_BUBBLE_MS;

    struct DeadConnector;

    impl TransportConnector for DeadConnector {
        fn join(&mut self, lobby: &str, _url: &str) -> Result<TransportLink, TransportError> {
            Err(TransportError::Unreachable(
                lobby.to_string(),
                "no signaling server".to_string(),
            ))
        }
    }

    fn config() -> Config {
        Config {
            lobby_name: "test-lobby".to_string(),
            signaling_url: "ws://localhost:4444".to_string(),
            username: "pingu".to_string(),
            log_level: "info".to_string(),
            tick_rate: 30,
        }
    }

    fn session_on(hub: &MemoryHub, id: PeerId, username: &str) -> SessionContext {
        let mut cfg = config();
        cfg.username = username.to_string();
        let mut connector = hub.connector();
        SessionContext::connect_with_doc(&cfg, &mut connector, SharedDocument::with_client_id(id))
    }

    #[test]
    fn transport_failure_degrades_to_local_only() {
        let mut session = SessionContext::connect_with_doc(
            &config(),
            &mut DeadConnector,
            SharedDocument::with_client_id(1),
        );

        assert!(!session.is_connected());
        assert!(session.known_peers().is_empty());

        // document operations still work against the local replica
        session.send_chat("anyone here?");
        assert_eq!(session.chat_log().len(), 1);
        assert!(session.pump().is_empty());
    }

    #[test]
    fn chat_replicates_through_the_sync_handshake() {
        let hub = MemoryHub::new();
        let mut a = session_on(&hub, 1, "pingu");
        a.send_chat("hello");

        // b joins after the fact and catches up via SyncStep1/SyncStep2
        let mut b = session_on(&hub, 2, "robby");
        let _ = a.pump(); // a greets b with its own sync request
        let _ = b.pump(); // b requests in turn
        let _ = a.pump(); // a answers with the missing diff
        let _ = b.pump(); // b applies it

        let log = b.chat_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].text, "hello");
        assert_eq!(log[0].author_id, 1);
    }

    #[test]
    fn awareness_flows_and_departure_is_detected() {
        let hub = MemoryHub::new();
        let mut a = session_on(&hub, 1, "pingu");
        let mut b = session_on(&hub, 2, "robby");

        let _ = a.pump();
        let _ = b.pump();
        let _ = a.pump();

        // both learned about each other, neither lists itself
        assert_eq!(a.known_peers().len(), 1);
        assert!(a.known_peers().contains_key(&2));
        assert_eq!(b.known_peers().len(), 1);
        assert!(b.known_peers().contains_key(&1));

        drop(b);
        let _ = a.pump();
        let peers = a.known_peers();
        let record = peers.get(&2).expect("departed peer is tagged, not deleted");
        assert!(record.removed);
    }

    #[test]
    fn chat_bubble_expires_but_the_log_entry_survives() {
        let mut session = SessionContext::connect_with_doc(
            &config(),
            &mut DeadConnector,
            SharedDocument::with_client_id(1),
        );

        session.send_chat("brrr");
        let sent_at = unix_millis();

        // before expiry the live text is visible
        session.publish_local(Vec2::default(), InputContent::default(), sent_at);
        assert_eq!(
            session.awareness.local_state().text.as_ref().unwrap().text,
            "brrr"
        );

        // past the deadline the live text reads empty...
        session.publish_local(
            Vec2::default(),
            InputContent::default(),
            sent_at + CHAT_BUBBLE_MS + 1,
        );
        assert_eq!(
            session.awareness.local_state().text.as_ref().unwrap().text,
            ""
        );

        // ...while the durable entry is unchanged, followed by the marker
        let log = session.chat_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].text, "brrr");
        assert!(log[1].is_retraction());
    }

    #[test]
    fn resolution_messages_reach_the_target_mailbox() {
        let hub = MemoryHub::new();
        let mut a = session_on(&hub, 1, "pingu");
        let mut b = session_on(&hub, 2, "robby");
        let _ = a.pump();
        let _ = b.pump();

        a.deliver(
            2,
            ResolutionMessage::Position {
                message_id: 9,
                object_id: 2,
                update: Vec2::new(50.0, 60.0),
            },
        );
        let _ = b.pump();

        let drained = b.drain_own_mailbox();
        assert_eq!(drained.len(), 1);
        b.clear_own_mailbox();
        assert!(b.drain_own_mailbox().is_empty());
    }

    #[test]
    fn malformed_frames_are_dropped_silently() {
        let hub = MemoryHub::new();
        let mut a = session_on(&hub, 1, "pingu");
        let b = session_on(&hub, 2, "robby");

        // raw garbage and an unknown tag, straight onto the wire
        b.broadcast(&Frame::Message {
            from: 2,
            content: "ok".to_string(),
        });
        if let Some(link) = &b.link {
            link.sink.send("{not json".to_string());
            link.sink.send(r#"{"type":"warp","content":1}"#.to_string());
        }

        let events = a.pump();
        // only the well-formed frame survived
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DirectEvent::Message { from: 2, .. }));
    }
}
