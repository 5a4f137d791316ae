// Copyright © 2024 Nathaniel Hardesty
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the “Software”), to
// deal in the Software without restriction, including without limitation the
// rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
// sell copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
// IN THE SOFTWARE.

//! # TRANSACTION REGISTRY
//!
//! Maps a transaction id to the [Handler] awaiting its response(s), and
//! allocates fresh ids. Mirrors the teacher's `outbox: Mutex<HashMap<MessageID,
//! SendOnce<...>>>` (`semi_e37::generic::Client`), generalized from a single
//! reply-or-none oneshot to a streaming handler that may be invoked more than
//! once before the transaction completes.
//!
//! [Handler]: crate::Handler

use std::collections::HashMap;

use crate::error::Error;
use crate::Handler;

/// An entry the registry holds for one in-flight transaction: the caller's
/// handler and the oneshot completion signal the reader pulses when the
/// handler reports the transaction done.
pub struct Entry {
    pub handler: Box<dyn Handler>,
    pub completion: oneshot::Sender<Result<(), Error>>,
}

/// ## REGISTRY
/// **Based on spec.md §4.2**
///
/// Holds every transaction currently registered on a connection. Always
/// accessed under the owning `Connection`'s lock; see spec.md §4.2's ordering
/// rule for why the handler itself is invoked outside this structure.
pub struct Registry {
    next_id: u32,
    entries: HashMap<u32, Entry>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        // Transaction ids start at 1; 0 is never issued (spec.md §4.2).
        Self {
            next_id: 1,
            entries: HashMap::new(),
        }
    }

    /// ### ALLOCATE ID
    ///
    /// Pre-increments the counter, skipping 0 on wraparound, and returns the
    /// id for the caller to register.
    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1;
        }
        id
    }

    /// ### REGISTER
    ///
    /// Allocates a fresh transaction id and inserts its entry. The caller is
    /// expected to hold the owning connection's lock across this call and the
    /// subsequent write, so that no response for this id can be read before
    /// the entry exists.
    pub fn register(
        &mut self,
        handler: Box<dyn Handler>,
        completion: oneshot::Sender<Result<(), Error>>,
    ) -> u32 {
        let id = self.allocate_id();
        self.entries.insert(id, Entry { handler, completion });
        id
    }

    /// ### LOOKUP (TAKE)
    ///
    /// Removes and returns the entry for `id`, if any. The reader loop takes
    /// ownership of the handler for the duration of one invocation and, if the
    /// transaction is not yet complete, re-inserts it via [`reinsert`].
    ///
    /// [`reinsert`]: Registry::reinsert
    pub fn take(&mut self, id: u32) -> Option<Entry> {
        self.entries.remove(&id)
    }

    /// ### REINSERT
    ///
    /// Restores an entry taken by [`take`] when its handler reports the
    /// transaction is not yet complete (streaming responses).
    ///
    /// [`take`]: Registry::take
    pub fn reinsert(&mut self, id: u32, entry: Entry) {
        self.entries.insert(id, entry);
    }

    /// ### REMOVE
    ///
    /// Unlinks the entry for `id` without returning it, used by the caller
    /// thread once it has woken from its own completion signal.
    pub fn remove(&mut self, id: u32) {
        self.entries.remove(&id);
    }

    /// ### CANCEL ALL
    ///
    /// Pulses every outstanding transaction's completion signal with `err`,
    /// exactly once each, and empties the registry. Used when the connection
    /// is torn down (reader EOF, short read) per spec.md §4.5.
    pub fn cancel_all(&mut self, err: Error) {
        for (_, entry) in self.entries.drain() {
            let _ = entry.completion.send(Err(err));
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HandlerOutcome;

    fn noop_handler() -> Box<dyn Handler> {
        Box::new(|_ctx| HandlerOutcome {
            completed: true,
            err: None,
        })
    }

    #[test]
    fn registered_ids_are_nonzero_and_distinct() {
        let mut registry = Registry::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        let id1 = registry.register(noop_handler(), tx1);
        let id2 = registry.register(noop_handler(), tx2);
        assert_ne!(id1, 0);
        assert_ne!(id2, 0);
        assert_ne!(id1, id2);
    }

    #[test]
    fn cancel_all_signals_every_waiter_once() {
        let mut registry = Registry::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        registry.register(noop_handler(), tx1);
        registry.register(noop_handler(), tx2);
        registry.cancel_all(Error::ConnectionFailed);
        assert_eq!(rx1.recv().unwrap(), Err(Error::ConnectionFailed));
        assert_eq!(rx2.recv().unwrap(), Err(Error::ConnectionFailed));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn take_removes_and_reinsert_restores() {
        let mut registry = Registry::new();
        let (tx, _rx) = oneshot::channel();
        let id = registry.register(noop_handler(), tx);
        let entry = registry.take(id).unwrap();
        assert!(registry.take(id).is_none());
        registry.reinsert(id, entry);
        assert!(registry.take(id).is_some());
    }
}
