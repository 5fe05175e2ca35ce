//! Machine types with a client namespace
//!
//! Each submodule declares a machine's state schema, event table and mutation
//! vocabulary, plus the controller operations a control page offers.

pub mod test_el2008;
pub mod test_machine;

use std::sync::Arc;

use qc_protocol::MachineIdentificationUnique;
use tracing::debug;

use crate::error::Result;
use crate::mutation::{MutationDispatcher, MutationTransport};
use crate::namespace::{Commit, MachineNamespace, SyncHandle};
use crate::optimistic::OptimisticOverlay;

pub use test_el2008::{TestEl2008Controller, TestEl2008Machine};
pub use test_machine::{TestMachine, TestMachineController};

/// One consumer's view of one machine: an optimistic overlay for reads and a
/// dispatcher for writes, both bound to the same address
pub struct MachineController<M: MachineNamespace, X> {
    address: MachineIdentificationUnique,
    overlay: OptimisticOverlay<M::State>,
    dispatcher: MutationDispatcher<X>,
}

impl<M: MachineNamespace, X: MutationTransport> MachineController<M, X> {
    pub fn new(overlay: OptimisticOverlay<M::State>, dispatcher: MutationDispatcher<X>) -> Self {
        Self {
            address: overlay.key(),
            overlay,
            dispatcher,
        }
    }

    /// Subscribe through a running sync loop and bind a controller to `address`
    pub async fn connect(
        handle: &SyncHandle,
        address: MachineIdentificationUnique,
        dispatcher: MutationDispatcher<X>,
    ) -> Result<Self> {
        let subscription = handle.subscribe::<M>(address).await?;
        debug!(namespace = %address, machine = M::SLUG, "Controller connected");
        Ok(Self::new(OptimisticOverlay::new(subscription), dispatcher))
    }

    pub fn address(&self) -> MachineIdentificationUnique {
        self.address
    }

    /// Effective state: the local projection if any, else the last commit
    pub fn state(&self) -> Option<Arc<M::State>> {
        self.overlay.current()
    }

    pub fn overlay(&self) -> &OptimisticOverlay<M::State> {
        &self.overlay
    }

    pub fn sync(&mut self) -> usize {
        self.overlay.sync()
    }

    pub async fn changed(&mut self) -> Option<Commit<M::State>> {
        self.overlay.changed().await
    }

    /// Project `mutation` locally, then send it.
    ///
    /// A failed send is returned to the caller but leaves the projection in
    /// place; only the next authoritative commit replaces it.
    pub fn mutate<F>(&mut self, mutation: M::Mutation, project: F) -> Result<u64>
    where
        F: FnOnce(&mut M::State),
    {
        self.overlay.set_optimistic(project);
        self.dispatcher.send::<M>(self.address, &mutation)
    }
}
