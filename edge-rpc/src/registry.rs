//! The registry of requests sent to the remote peer and still waiting for a response.
use std::fmt;

use crate::context::RequestContext;
use crate::handler::ResponseHandler;
use crate::types::{Id, JsonValue};

/// One outstanding request.
///
/// The entry owns the request payload and the caller's context.  Dropping the entry releases
/// both, so however an entry leaves the registry (response, cancellation, drain) its context is
/// released exactly once.
pub struct PendingRequest<C> {
    pub(crate) id: Id,
    pub(crate) payload: JsonValue,
    pub(crate) handler: ResponseHandler<C>,
    pub(crate) context: RequestContext<C>,
}

impl<C> PendingRequest<C> {
    pub(crate) fn new(
        id: Id,
        payload: JsonValue,
        handler: ResponseHandler<C>,
        context: RequestContext<C>,
    ) -> Self {
        Self {
            id,
            payload,
            handler,
            context,
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    /// The request as it was sent, including the assigned `id`
    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    /// The method name of the request, if the payload has one
    pub fn method(&self) -> Option<&str> {
        self.payload.get("method").and_then(JsonValue::as_str)
    }

    pub fn context(&self) -> &C {
        self.context.get()
    }
}

impl<C> fmt::Debug for PendingRequest<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("method", &self.method())
            .finish_non_exhaustive()
    }
}

/// Insertion-ordered collection of [`PendingRequest`]s.
///
/// Lookups are linear scans.  The registry doesn't reject duplicate ids; uniqueness is the id
/// generator's job.  If duplicates do slip in, lookups find the oldest one first.
///
/// There is no interior locking: the registry belongs to exactly one engine, which in turn is
/// driven by exactly one task.
pub struct MessageRegistry<C> {
    entries: Vec<PendingRequest<C>>,
}

impl<C> MessageRegistry<C> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry at the end of the registry
    pub fn insert(&mut self, entry: PendingRequest<C>) {
        self.entries.push(entry);
    }

    pub fn find_by_id(&self, id: &Id) -> Option<&PendingRequest<C>> {
        self.entries.iter().find(|entry| &entry.id == id)
    }

    /// Remove and return the first entry whose id equals `id`.
    pub fn remove(&mut self, id: &Id) -> Option<PendingRequest<C>> {
        let position = self.entries.iter().position(|entry| &entry.id == id)?;
        Some(self.entries.remove(position))
    }

    /// Ids of all pending requests, oldest first
    pub fn ids(&self) -> impl Iterator<Item = &Id> + '_ {
        self.entries.iter().map(|entry| &entry.id)
    }

    /// Remove every entry, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = PendingRequest<C>> + '_ {
        self.entries.drain(..)
    }
}

impl<C> Default for MessageRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for MessageRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(id: &str, released: &Arc<AtomicUsize>) -> PendingRequest<()> {
        let released = released.clone();
        PendingRequest::new(
            Id::from(id),
            json!({"jsonrpc": "2.0", "method": "test", "params": {}, "id": id}),
            ResponseHandler::ignore(),
            RequestContext::new((), move |()| {
                released.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn test_insert_find_remove() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut registry = MessageRegistry::new();
        assert!(registry.is_empty());

        registry.insert(entry("a", &released));
        registry.insert(entry("b", &released));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids().cloned().collect::<Vec<_>>(), vec![Id::from("a"), Id::from("b")]);

        let found = registry.find_by_id(&Id::from("b")).unwrap();
        assert_eq!(found.method(), Some("test"));
        assert_eq!(found.payload()["id"], json!("b"));

        let removed = registry.remove(&Id::from("a")).unwrap();
        assert_eq!(removed.id(), &Id::from("a"));
        assert_eq!(registry.len(), 1);
        assert_eq!(released.load(Ordering::SeqCst), 0);

        drop(removed);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        assert!(registry.remove(&Id::from("a")).is_none());
    }

    #[test]
    fn test_lookup_requires_full_match() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut registry = MessageRegistry::new();
        registry.insert(entry("10", &released));
        registry.insert(entry("1", &released));

        // "1" is a prefix of "10" but must only ever match "1"
        let removed = registry.remove(&Id::from("1")).unwrap();
        assert_eq!(removed.id(), &Id::from("1"));
        assert!(registry.find_by_id(&Id::from("10")).is_some());
        assert!(registry.find_by_id(&Id::from("100")).is_none());
    }

    #[test]
    fn test_duplicate_ids_resolve_oldest_first() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut registry = MessageRegistry::new();
        let mut first = entry("dup", &released);
        first.payload["params"] = json!({"order": 1});
        registry.insert(first);
        registry.insert(entry("dup", &released));

        let removed = registry.remove(&Id::from("dup")).unwrap();
        assert_eq!(removed.payload()["params"]["order"], json!(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_drain_releases_everything() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut registry = MessageRegistry::new();
        for id in ["a", "b", "c"] {
            registry.insert(entry(id, &released));
        }

        assert_eq!(registry.drain().count(), 3);
        assert!(registry.is_empty());
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }
}
