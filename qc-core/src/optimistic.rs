//! Optimistic overlay
//!
//! A consumer-local projection of where a machine is about to be, layered on
//! top of a namespace subscription. The projection lives until the next
//! authoritative commit, which always replaces it wholesale.

use std::sync::Arc;

use qc_protocol::MachineIdentificationUnique;
use tracing::trace;

use crate::namespace::{Commit, Subscription};

/// Authoritative value plus an optional local projection
#[derive(Debug)]
pub struct OptimisticState<T> {
    real: Option<Arc<T>>,
    optimistic: Option<Arc<T>>,
}

impl<T> Default for OptimisticState<T> {
    fn default() -> Self {
        Self {
            real: None,
            optimistic: None,
        }
    }
}

impl<T: Clone> OptimisticState<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn real(&self) -> Option<&Arc<T>> {
        self.real.as_ref()
    }

    pub fn optimistic(&self) -> Option<&Arc<T>> {
        self.optimistic.as_ref()
    }

    pub fn is_optimistic(&self) -> bool {
        self.optimistic.is_some()
    }

    /// Effective value: the projection if present, else the real value
    pub fn current(&self) -> Option<Arc<T>> {
        self.optimistic.as_ref().or(self.real.as_ref()).cloned()
    }

    /// Install a new authoritative value. Any projection is dropped without
    /// merging. Returns whether a projection was discarded.
    pub fn set_real(&mut self, value: Option<Arc<T>>) -> bool {
        self.real = value;
        self.optimistic.take().is_some()
    }

    /// Project the effective value through `producer`.
    ///
    /// Works on a private copy; retained snapshots are never edited in place.
    /// Without any value there is nothing to project and `false` is returned.
    pub fn set_optimistic<F>(&mut self, producer: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        let Some(base) = self.current() else {
            return false;
        };

        let mut next = T::clone(&base);
        producer(&mut next);
        self.optimistic = Some(Arc::new(next));
        true
    }

    pub fn clear_optimistic(&mut self) {
        self.optimistic = None;
    }
}

/// Per-consumer overlay over one namespace subscription
#[derive(Debug)]
pub struct OptimisticOverlay<T> {
    subscription: Subscription<T>,
    state: OptimisticState<T>,
}

impl<T: Clone> OptimisticOverlay<T> {
    pub fn new(subscription: Subscription<T>) -> Self {
        let mut state = OptimisticState::new();
        state.set_real(subscription.current());
        Self {
            subscription,
            state,
        }
    }

    pub fn key(&self) -> MachineIdentificationUnique {
        self.subscription.key()
    }

    pub fn current(&self) -> Option<Arc<T>> {
        self.state.current()
    }

    pub fn state(&self) -> &OptimisticState<T> {
        &self.state
    }

    pub fn set_optimistic<F>(&mut self, producer: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        let projected = self.state.set_optimistic(producer);
        trace!(namespace = %self.key(), projected, "Applied optimistic projection");
        projected
    }

    /// Apply every commit delivered so far. Returns how many were applied.
    pub fn sync(&mut self) -> usize {
        let mut applied = 0;
        while let Some(commit) = self.subscription.try_recv() {
            self.apply(commit);
            applied += 1;
        }
        applied
    }

    /// Wait for the next commit and apply it. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Commit<T>> {
        let commit = self.subscription.recv().await?;
        self.apply(commit.clone());
        Some(commit)
    }

    fn apply(&mut self, commit: Commit<T>) {
        let discarded = self.state.set_real(Some(commit.value));
        if discarded {
            trace!(
                namespace = %self.key(),
                sequence = commit.sequence,
                "Authoritative commit replaced optimistic projection"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Panel {
        mode: &'static str,
        leds: [bool; 2],
    }

    fn panel(mode: &'static str) -> Arc<Panel> {
        Arc::new(Panel {
            mode,
            leds: [false; 2],
        })
    }

    #[test]
    fn test_projection_without_value_is_noop() {
        let mut state = OptimisticState::<Panel>::new();
        assert!(!state.set_optimistic(|p| p.mode = "Automatic"));
        assert!(state.current().is_none());
    }

    #[test]
    fn test_projection_is_copy_on_write() {
        let real = panel("Manual");
        let mut state = OptimisticState::new();
        state.set_real(Some(Arc::clone(&real)));

        assert!(state.set_optimistic(|p| p.mode = "Automatic"));
        assert_eq!(real.mode, "Manual");
        assert_eq!(state.real().unwrap().mode, "Manual");
        assert_eq!(state.current().unwrap().mode, "Automatic");
    }

    #[test]
    fn test_projections_stack_on_effective_value() {
        let mut state = OptimisticState::new();
        state.set_real(Some(panel("Manual")));
        state.set_optimistic(|p| p.leds[0] = true);
        state.set_optimistic(|p| p.leds[1] = true);
        assert_eq!(state.current().unwrap().leds, [true, true]);
    }

    #[test]
    fn test_authoritative_value_wins_without_merge() {
        let mut state = OptimisticState::new();
        state.set_real(Some(panel("Manual")));
        state.set_optimistic(|p| {
            p.mode = "Automatic";
            p.leds = [true, true];
        });

        let discarded = state.set_real(Some(panel("Home")));
        assert!(discarded);
        assert!(!state.is_optimistic());
        assert_eq!(*state.current().unwrap(), *panel("Home"));
    }

    mod overlay {
        use super::*;
        use crate::namespace::NamespaceStore;
        use qc_protocol::MachineIdentification;

        fn store() -> NamespaceStore<Panel> {
            NamespaceStore::new(MachineIdentificationUnique::new(
                MachineIdentification::new(1, 0x36),
                1,
            ))
        }

        #[test]
        fn test_overlay_starts_from_store_value() {
            let mut store = store();
            let _keep = store.subscribe();
            store.commit((*panel("Home")).clone());

            let overlay = OptimisticOverlay::new(store.subscribe());
            assert_eq!(overlay.current().unwrap().mode, "Home");
        }

        #[test]
        fn test_equal_recommit_still_clears_projection() {
            let mut store = store();
            let mut overlay = OptimisticOverlay::new(store.subscribe());
            store.commit((*panel("Manual")).clone());
            assert_eq!(overlay.sync(), 1);

            overlay.set_optimistic(|p| p.mode = "Automatic");
            let commit = store.commit((*panel("Manual")).clone());
            assert!(!commit.changed);

            assert_eq!(overlay.sync(), 1);
            assert!(!overlay.state().is_optimistic());
            assert_eq!(overlay.current().unwrap().mode, "Manual");
        }

        #[tokio::test]
        async fn test_changed_waits_for_commit() {
            let mut store = store();
            let mut overlay = OptimisticOverlay::new(store.subscribe());
            store.commit((*panel("Home")).clone());

            let commit = overlay.changed().await.unwrap();
            assert!(commit.changed);
            assert_eq!(overlay.current().unwrap().mode, "Home");

            drop(store);
            assert!(overlay.changed().await.is_none());
        }
    }
}
