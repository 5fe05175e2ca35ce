//! Namespace store
//!
//! Holds the last authoritative state of one physical machine and fans every
//! commit out to its subscribers. The store has a single writer (the owning
//! hub) and any number of read-only observers.

use std::fmt;
use std::sync::Arc;

use qc_protocol::MachineIdentificationUnique;
use tokio::sync::{mpsc, watch, Notify};
use tracing::trace;

/// Tells the owner of a store that one of its subscriptions was dropped
#[derive(Debug, Clone)]
pub(crate) struct ReleaseSignal {
    released: mpsc::UnboundedSender<MachineIdentificationUnique>,
    notify: Arc<Notify>,
}

impl ReleaseSignal {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<MachineIdentificationUnique>) {
        let (released, rx) = mpsc::unbounded_channel();
        let signal = Self {
            released,
            notify: Arc::new(Notify::new()),
        };
        (signal, rx)
    }

    pub(crate) fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    fn send(&self, key: MachineIdentificationUnique) {
        // The owner may already be gone, then there is nothing left to release
        let _ = self.released.send(key);
        self.notify.notify_one();
    }
}

/// One committed state as seen by a subscriber
#[derive(Debug)]
pub struct Commit<T> {
    pub value: Arc<T>,
    /// False when the committed value equals the previous one
    pub changed: bool,
    /// Position in this store's commit sequence, starting at 1
    pub sequence: u64,
}

impl<T> Clone for Commit<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            changed: self.changed,
            sequence: self.sequence,
        }
    }
}

pub struct NamespaceStore<T> {
    key: MachineIdentificationUnique,
    current: watch::Sender<Option<Arc<T>>>,
    subscribers: Vec<mpsc::UnboundedSender<Commit<T>>>,
    sequence: u64,
    release: Option<ReleaseSignal>,
}

impl<T> fmt::Debug for NamespaceStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceStore")
            .field("key", &self.key)
            .field("subscribers", &self.subscribers.len())
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl<T: PartialEq> NamespaceStore<T> {
    pub(crate) fn new(key: MachineIdentificationUnique) -> Self {
        Self::with_release(key, None)
    }

    /// A store whose subscriptions report their release through `release`
    pub(crate) fn with_release(
        key: MachineIdentificationUnique,
        release: Option<ReleaseSignal>,
    ) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            key,
            current,
            subscribers: Vec::new(),
            sequence: 0,
            release,
        }
    }

    pub fn key(&self) -> MachineIdentificationUnique {
        self.key
    }

    /// Last committed value
    pub fn current(&self) -> Option<Arc<T>> {
        self.current.borrow().clone()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn subscribe(&mut self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        Subscription {
            key: self.key,
            commits: rx,
            current: self.current.subscribe(),
            release: self.release.clone(),
        }
    }

    /// Live subscribers, forgetting any that have gone away
    pub fn subscriber_count(&mut self) -> usize {
        self.subscribers.retain(|s| !s.is_closed());
        self.subscribers.len()
    }

    pub fn is_orphaned(&self) -> bool {
        self.subscribers.iter().all(|s| s.is_closed())
    }

    /// Replace the current value and notify every live subscriber.
    ///
    /// Re-committing an equal value keeps the retained snapshot and is
    /// delivered with `changed == false`.
    pub(crate) fn commit(&mut self, value: T) -> Commit<T> {
        let previous = self.current();
        let (value, changed) = match previous {
            Some(prev) if *prev == value => (prev, false),
            _ => (Arc::new(value), true),
        };

        if changed {
            self.current.send_replace(Some(Arc::clone(&value)));
        }

        self.sequence += 1;
        let commit = Commit {
            value,
            changed,
            sequence: self.sequence,
        };

        // A closed receiver means the subscriber already left; its copy is discarded
        self.subscribers
            .retain(|subscriber| subscriber.send(commit.clone()).is_ok());

        trace!(
            namespace = %self.key,
            sequence = commit.sequence,
            changed,
            subscribers = self.subscribers.len(),
            "Committed namespace state"
        );
        commit
    }
}

/// A live view of one namespace. Dropping it unsubscribes.
pub struct Subscription<T> {
    key: MachineIdentificationUnique,
    commits: mpsc::UnboundedReceiver<Commit<T>>,
    current: watch::Receiver<Option<Arc<T>>>,
    release: Option<ReleaseSignal>,
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("key", &self.key).finish()
    }
}

impl<T> Subscription<T> {
    pub fn key(&self) -> MachineIdentificationUnique {
        self.key
    }

    /// Synchronous read of the store's last committed value
    pub fn current(&self) -> Option<Arc<T>> {
        self.current.borrow().clone()
    }

    /// Wait for the next commit. `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<Commit<T>> {
        self.commits.recv().await
    }

    /// Next already-delivered commit, without waiting
    pub fn try_recv(&mut self) -> Option<Commit<T>> {
        self.commits.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        // Closed before signalling, so the store already counts this subscriber as gone
        self.commits.close();
        if let Some(release) = &self.release {
            release.send(self.key);
        }
    }
}
