//! Caller-side message reassembly.
//!
//! A read that stops short of end-of-record leaves the rest of the message
//! to later reads, and on a one-to-many socket those later reads may carry
//! other associations' messages in between. [`MessageReassembler`] keeps
//! one accumulation buffer per `(association, stream)` and hands back whole
//! messages. Sockets never reassemble on their own.

use bytes::{Bytes, BytesMut};
use hashbrown::HashMap;
use polystream_core::assoc::AssocId;
use polystream_core::error::{Result, SctpError};
use tracing::trace;

use crate::codec::MessageMetadata;
use crate::notification::Notification;
use crate::socket::{ReadOutcome, SctpSocket};

/// A complete message or notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    Message {
        metadata: MessageMetadata,
        payload: Bytes,
    },
    Notification(Notification),
}

/// Collects partial reads until each message is whole.
///
/// Not thread-safe; owned by one read loop. Concurrent readers of a shared
/// socket each need their own, and a message split across two readers
/// cannot be rebuilt by either.
#[derive(Debug)]
pub struct MessageReassembler {
    partial: HashMap<(AssocId, u16), BytesMut>,
    notification: BytesMut,
    scratch: Vec<u8>,
    max_bytes: usize,
}

impl MessageReassembler {
    pub const DEFAULT_MAX_BYTES: usize = 8 * 1024 * 1024;

    /// A reassembler refusing messages larger than `max_bytes`.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            partial: HashMap::new(),
            notification: BytesMut::new(),
            scratch: Vec::new(),
            max_bytes,
        }
    }

    /// Feed the bytes of one [`read`](SctpSocket::read).
    ///
    /// Returns:
    /// - `Ok(None)` if the message is still incomplete
    /// - `Ok(Some(_))` once `outcome` carries end-of-record
    /// - `Err(MessageTooLarge)` when the limit is passed; that partial
    ///   message is dropped
    pub fn push(&mut self, outcome: &ReadOutcome, bytes: &[u8]) -> Result<Option<Assembled>> {
        let bytes = &bytes[..outcome.len];

        if outcome.is_notification() {
            if self.notification.len() + bytes.len() > self.max_bytes {
                self.notification.clear();
                return Err(SctpError::MessageTooLarge {
                    limit: self.max_bytes,
                });
            }
            self.notification.extend_from_slice(bytes);
            if !outcome.end_of_record() {
                return Ok(None);
            }
            let record = self.notification.split().freeze();
            let notification = Notification::decode(&record)?;
            self.forget_ended(&notification);
            return Ok(Some(Assembled::Notification(notification)));
        }

        let metadata = outcome.metadata.unwrap_or_default();
        let key = (metadata.assoc_id, metadata.stream);

        // Whole message in one read, nothing buffered for this key
        if outcome.end_of_record() && !self.partial.contains_key(&key) {
            if bytes.len() > self.max_bytes {
                return Err(SctpError::MessageTooLarge {
                    limit: self.max_bytes,
                });
            }
            return Ok(Some(Assembled::Message {
                metadata,
                payload: Bytes::copy_from_slice(bytes),
            }));
        }

        let buffered = self.partial.entry(key).or_default();
        if buffered.len() + bytes.len() > self.max_bytes {
            self.partial.remove(&key);
            return Err(SctpError::MessageTooLarge {
                limit: self.max_bytes,
            });
        }
        buffered.extend_from_slice(bytes);
        if !outcome.end_of_record() {
            trace!(
                "[REASSEMBLY] {} bytes pending on association {} stream {}",
                buffered.len(),
                key.0,
                key.1
            );
            return Ok(None);
        }

        let payload = self
            .partial
            .remove(&key)
            .map(BytesMut::freeze)
            .unwrap_or_default();
        Ok(Some(Assembled::Message { metadata, payload }))
    }

    /// Read from `socket` until a message or notification is whole.
    ///
    /// Each receive goes through a scratch buffer of the socket's
    /// configured read buffer size; that size does not bound the message.
    pub async fn read_from(&mut self, socket: &SctpSocket) -> Result<Assembled> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(socket.read_buffer_size().max(1), 0);
        let result = loop {
            match socket.read(&mut scratch).await {
                Ok(outcome) => match self.push(&outcome, &scratch) {
                    Ok(Some(done)) => break Ok(done),
                    Ok(None) => {}
                    Err(e) => break Err(e),
                },
                Err(e) => break Err(e),
            }
        };
        self.scratch = scratch;
        result
    }

    /// Drop partial messages of `assoc` (after it went away or was peeled off).
    pub fn discard(&mut self, assoc: AssocId) {
        self.partial.retain(|(id, _), _| *id != assoc);
    }

    /// Number of `(association, stream)` pairs with a partial message.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    fn forget_ended(&mut self, notification: &Notification) {
        if let Notification::AssociationChange {
            state, assoc_id, ..
        } = notification
        {
            if state.is_terminal() {
                self.discard(*assoc_id);
            }
        }
    }
}

impl Default for MessageReassembler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_BYTES)
    }
}
