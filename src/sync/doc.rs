//! Shared replicated document
//!
//! A convergent document holding the append-only chat log and the per-peer
//! state map used as the mailbox substrate. Values are stored as JSON
//! strings, one per peer entry or chat entry, so a mailbox write is a
//! complete-state overwrite of that peer's map key: last-write-wins at
//! entry granularity, exactly the granularity the mailbox protocol relies
//! on (and is known to race on, see the mailbox module).

use std::collections::HashMap;

use tracing::warn;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Any, Array, Doc, Map, Out, ReadTxn, StateVector, Transact, Update, WriteTxn};

use crate::net::protocol::{ChatEntry, MailboxState, PeerId, ResolutionMessage};

/// Root name of the shared chat log
const CHAT_LOG: &str = "chat-history";
/// Root name of the per-peer state map
const PEER_STATE: &str = "global-state";

type ChatObserver = Box<dyn FnMut(&[ChatEntry]) + Send>;
type MailboxObserver = Box<dyn FnMut(&HashMap<PeerId, MailboxState>) + Send>;

#[derive(Debug, thiserror::Error)]
pub enum DocError {
    #[error("malformed document payload: {0}")]
    Malformed(String),
}

/// One replica of the shared document
pub struct SharedDocument {
    doc: Doc,
    chat_observers: Vec<ChatObserver>,
    mailbox_observers: Vec<MailboxObserver>,
    /// State already pushed to the mesh; `take_update` diffs against this
    broadcast_cursor: StateVector,
    seen_chat_len: u32,
    seen_state: HashMap<PeerId, String>,
}

impl SharedDocument {
    pub fn new() -> Self {
        Self::with_doc(Doc::new())
    }

    /// Fixed replica identity, for tests and deterministic sandboxes
    pub fn with_client_id(client_id: PeerId) -> Self {
        Self::with_doc(Doc::with_client_id(client_id))
    }

    fn with_doc(doc: Doc) -> Self {
        Self {
            doc,
            chat_observers: Vec::new(),
            mailbox_observers: Vec::new(),
            broadcast_cursor: StateVector::default(),
            seen_chat_len: 0,
            seen_state: HashMap::new(),
        }
    }

    /// Replica identity assigned by the document session
    pub fn client_id(&self) -> PeerId {
        self.doc.client_id()
    }

    // --- chat log ---

    pub fn append_chat(&mut self, entry: ChatEntry) {
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "dropping unserializable chat entry");
                return;
            }
        };
        {
            let mut txn = self.doc.transact_mut();
            let chat = txn.get_or_insert_array(CHAT_LOG);
            chat.push_back(&mut txn, raw);
        }
        self.notify();
    }

    /// Full ordered chat log as observed by this replica
    pub fn chat_log(&self) -> Vec<ChatEntry> {
        let txn = self.doc.transact();
        let Some(chat) = txn.get_array(CHAT_LOG) else {
            return Vec::new();
        };
        chat.iter(&txn)
            .filter_map(json_string)
            .filter_map(|raw| serde_json::from_str(&raw).ok())
            .collect()
    }

    fn chat_len(&self) -> u32 {
        let txn = self.doc.transact();
        txn.get_array(CHAT_LOG).map(|chat| chat.len(&txn)).unwrap_or(0)
    }

    // --- peer state map ---

    pub fn mailbox(&self, peer: PeerId) -> Option<MailboxState> {
        let txn = self.doc.transact();
        let value = txn.get_map(PEER_STATE)?.get(&txn, &peer.to_string())?;
        json_string(value).and_then(|raw| serde_json::from_str(&raw).ok())
    }

    pub fn my_mailbox(&self) -> Option<MailboxState> {
        self.mailbox(self.client_id())
    }

    /// Replace this replica's full map entry
    pub fn set_my_mailbox(&mut self, state: MailboxState) {
        self.set_entry(self.client_id(), &state);
        self.notify();
    }

    /// Read-modify-write append against the latest locally-observed entry.
    /// The entry is created lazily on the first message addressed to a peer.
    pub fn append_to_peer_mailbox(&mut self, peer: PeerId, message: ResolutionMessage) {
        let mut state = self.mailbox(peer).unwrap_or_default();
        state.messages.push(message);
        self.set_entry(peer, &state);
        self.notify();
    }

    fn set_entry(&mut self, peer: PeerId, state: &MailboxState) {
        let raw = match serde_json::to_string(state) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, peer_id = peer, "dropping unserializable mailbox entry");
                return;
            }
        };
        let mut txn = self.doc.transact_mut();
        let peers = txn.get_or_insert_map(PEER_STATE);
        peers.insert(&mut txn, peer.to_string(), raw);
    }

    /// Full current `peer id -> mailbox state` map
    pub fn mailboxes(&self) -> HashMap<PeerId, MailboxState> {
        self.raw_entries()
            .into_iter()
            .filter_map(|(id, raw)| Some((id, serde_json::from_str(&raw).ok()?)))
            .collect()
    }

    fn raw_entries(&self) -> HashMap<PeerId, String> {
        let txn = self.doc.transact();
        let Some(peers) = txn.get_map(PEER_STATE) else {
            return HashMap::new();
        };
        peers
            .iter(&txn)
            .filter_map(|(key, value)| {
                let id = key.parse::<PeerId>().ok()?;
                Some((id, json_string(value)?))
            })
            .collect()
    }

    // --- observers ---

    /// Fires whenever the chat log grows; receives the full ordered log
    pub fn observe_chat_log(&mut self, callback: impl FnMut(&[ChatEntry]) + Send + 'static) {
        self.chat_observers.push(Box::new(callback));
    }

    /// Fires on any change to any peer's mailbox entry; receives the full map
    pub fn observe_mailboxes(
        &mut self,
        callback: impl FnMut(&HashMap<PeerId, MailboxState>) + Send + 'static,
    ) {
        self.mailbox_observers.push(Box::new(callback));
    }

    /// Fire observers for whatever changed since the last notification
    fn notify(&mut self) {
        let chat_len = self.chat_len();
        if chat_len > self.seen_chat_len {
            self.seen_chat_len = chat_len;
            let log = self.chat_log();
            for callback in &mut self.chat_observers {
                callback(&log);
            }
        }

        let raw = self.raw_entries();
        if raw != self.seen_state {
            self.seen_state = raw;
            let mailboxes = self.mailboxes();
            for callback in &mut self.mailbox_observers {
                callback(&mailboxes);
            }
        }
    }

    // --- replication ---

    /// Our current state vector, to request what we are missing
    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Everything a remote replica is missing, given its state vector
    pub fn diff_for(&self, state_vector: &[u8]) -> Result<Vec<u8>, DocError> {
        let sv =
            StateVector::decode_v1(state_vector).map_err(|e| DocError::Malformed(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Apply a remote update, then fire observers for anything it changed
    pub fn apply_update(&mut self, update: &[u8]) -> Result<(), DocError> {
        let update = Update::decode_v1(update).map_err(|e| DocError::Malformed(e.to_string()))?;
        {
            let mut txn = self.doc.transact_mut();
            txn.apply_update(update)
                .map_err(|e| DocError::Malformed(e.to_string()))?;
        }
        self.notify();
        Ok(())
    }

    /// Drain the changes that have not been broadcast yet. Returns `None`
    /// when the mesh is already caught up, so idle ticks stay silent.
    pub fn take_update(&mut self) -> Option<Vec<u8>> {
        let (diff, head) = {
            let txn = self.doc.transact();
            (
                txn.encode_state_as_update_v1(&self.broadcast_cursor),
                txn.state_vector(),
            )
        };
        if head == self.broadcast_cursor {
            return None;
        }
        self.broadcast_cursor = head;
        Some(diff)
    }
}

impl Default for SharedDocument {
    fn default() -> Self {
        Self::new()
    }
}

fn json_string(value: Out) -> Option<String> {
    match value {
        Out::Any(Any::String(raw)) => Some(raw.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::net::protocol::{ResolutionMessage, Vec2};

    fn entry(author_id: PeerId, text: &str) -> ChatEntry {
        ChatEntry {
            author_id,
            username: format!("peer-{author_id}"),
            text: text.to_string(),
            timestamp: 1_000,
        }
    }

    /// Push full-state diffs both ways until both replicas agree
    fn converge(a: &mut SharedDocument, b: &mut SharedDocument) {
        let to_b = a.diff_for(&b.state_vector()).unwrap();
        b.apply_update(&to_b).unwrap();
        let to_a = b.diff_for(&a.state_vector()).unwrap();
        a.apply_update(&to_a).unwrap();
    }

    #[test]
    fn chat_log_replicates_in_order() {
        let mut a = SharedDocument::with_client_id(1);
        let mut b = SharedDocument::with_client_id(2);

        a.append_chat(entry(1, "hello"));
        a.append_chat(entry(1, "world"));
        converge(&mut a, &mut b);

        let log = b.chat_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].text, "hello");
        assert_eq!(log[1].text, "world");
    }

    #[test]
    fn chat_observer_fires_on_growth_only() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut a = SharedDocument::with_client_id(1);
        let counter = fired.clone();
        a.observe_chat_log(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        a.append_chat(entry(1, "hi"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // a mailbox write must not fire the chat observer
        a.set_my_mailbox(MailboxState::default());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mailbox_observer_sees_remote_appends() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut a = SharedDocument::with_client_id(1);
        let mut b = SharedDocument::with_client_id(2);
        let counter = fired.clone();
        a.observe_mailboxes(move |map| {
            if map.values().any(|m| !m.messages.is_empty()) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        b.append_to_peer_mailbox(
            1,
            ResolutionMessage::Position {
                message_id: 42,
                object_id: 1,
                update: Vec2::new(3.0, 4.0),
            },
        );
        converge(&mut a, &mut b);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(a.my_mailbox().unwrap().messages.len(), 1);
    }

    #[test]
    fn take_update_is_empty_when_caught_up() {
        let mut a = SharedDocument::with_client_id(1);
        assert!(a.take_update().is_none());

        a.append_chat(entry(1, "hi"));
        assert!(a.take_update().is_some());
        assert!(a.take_update().is_none());
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let mut a = SharedDocument::with_client_id(1);
        assert!(a.apply_update(&[0xff, 0x00, 0x13, 0x37]).is_err());
        assert!(a.diff_for(&[0xff, 0xff]).is_err());
    }

    #[test]
    fn non_string_entries_are_skipped() {
        // a peer writing garbage into the shared roots must not poison reads
        let a = SharedDocument::with_client_id(1);
        {
            let mut txn = a.doc.transact_mut();
            let chat = txn.get_or_insert_array(CHAT_LOG);
            chat.push_back(&mut txn, 17.0);
            let peers = txn.get_or_insert_map(PEER_STATE);
            peers.insert(&mut txn, "2", 17.0);
            peers.insert(&mut txn, "not-a-peer-id", "{}".to_string());
        }
        assert!(a.chat_log().is_empty());
        assert!(a.mailboxes().is_empty());
    }
}
