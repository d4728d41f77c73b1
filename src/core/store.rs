//! Purpose: Hold the in-memory message board shared by all request handlers.
//! Exports: `MessageStore`, `DeleteOutcome`, `Snapshot`, `StreamSender`.
//! Role: Single owner of the ordered message collection; transports call into it.
//! Invariants: Every structural change (append, remove, snapshot copy) happens under one mutex.
//! Invariants: The mutex is never held while a `StreamSender` runs.
//! Invariants: Collection order is insertion order; messages are never edited in place.
//! Invariants: Delete removes at most one message, the earliest id starting with the prefix.
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::core::clock::{Clock, SystemClock};
use crate::core::error::{Error, ErrorKind};
use crate::core::ids::{IdGenerator, RandomIds};
use crate::core::message::{Message, short_id};

/// Sink that receives messages one at a time while a list is delivered.
///
/// Returning an error stops delivery; the error is handed back to the caller of
/// [`MessageStore::list`] untouched.
pub trait StreamSender {
    fn send(&mut self, message: &Message) -> Result<(), Error>;
}

impl<F> StreamSender for F
where
    F: FnMut(&Message) -> Result<(), Error>,
{
    fn send(&mut self, message: &Message) -> Result<(), Error> {
        self(message)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeleteOutcome {
    Removed(Arc<Message>),
    NotFound,
}

impl DeleteOutcome {
    pub fn is_removed(&self) -> bool {
        matches!(self, DeleteOutcome::Removed(_))
    }

    /// Turns a miss into a `NotFound` error carrying the prefix.
    pub fn into_result(self, id_prefix: &str) -> Result<Arc<Message>, Error> {
        match self {
            DeleteOutcome::Removed(message) => Ok(message),
            DeleteOutcome::NotFound => Err(Error::new(ErrorKind::NotFound)
                .with_message("no message matches id prefix")
                .with_id(id_prefix)),
        }
    }
}

/// Point-in-time copy of the collection, in insertion order.
pub struct Snapshot {
    messages: std::vec::IntoIter<Arc<Message>>,
}

impl Iterator for Snapshot {
    type Item = Arc<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        self.messages.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.messages.size_hint()
    }
}

impl ExactSizeIterator for Snapshot {}

pub struct MessageStore<C: Clock = SystemClock, G: IdGenerator = RandomIds> {
    messages: Mutex<Vec<Arc<Message>>>,
    clock: C,
    ids: G,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::with_sources(SystemClock, RandomIds)
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock, G: IdGenerator> MessageStore<C, G> {
    pub fn with_sources(clock: C, ids: G) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            clock,
            ids,
        }
    }

    /// Appends a message and returns its freshly assigned id.
    pub fn publish(&self, sender_username: impl Into<String>, body: impl Into<String>) -> String {
        let message = Arc::new(Message {
            id: self.ids.next_id(),
            sender_username: sender_username.into(),
            body: body.into(),
            sent_at: self.clock.now(),
        });
        let id = message.id.clone();
        let sender = message.sender_username.clone();

        self.lock().push(message);

        info!(id = short_id(&id), sender = %sender, "published message");
        id
    }

    pub fn delete(&self, id_prefix: &str) -> DeleteOutcome {
        let removed = {
            let mut messages = self.lock();
            messages
                .iter()
                .position(|message| message.id.starts_with(id_prefix))
                .map(|index| messages.remove(index))
        };

        match removed {
            Some(message) => {
                info!(id = message.short_id(), "deleted message");
                DeleteOutcome::Removed(message)
            }
            None => {
                info!(prefix = id_prefix, "no message found: nothing deleted");
                DeleteOutcome::NotFound
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let copy = self.lock().clone();
        Snapshot {
            messages: copy.into_iter(),
        }
    }

    /// Delivers a snapshot to `sender` in insertion order.
    ///
    /// Stops at the first failed send and returns that error; nothing is resent.
    /// On success returns how many messages were delivered.
    pub fn list<S>(&self, sender: &mut S) -> Result<usize, Error>
    where
        S: StreamSender + ?Sized,
    {
        let snapshot = self.snapshot();
        debug!(count = snapshot.len(), "listing messages");

        let mut delivered = 0usize;
        for message in snapshot {
            if let Err(err) = sender.send(&message) {
                warn!(delivered, error = %err, "list aborted");
                return Err(err);
            }
            delivered += 1;
        }

        info!(delivered, "listed messages");
        Ok(delivered)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Push and remove are single calls on the Vec, so a panic elsewhere cannot
    // leave it half-updated.
    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Message>>> {
        self.messages
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}
