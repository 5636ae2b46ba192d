//! VM snapshots.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use vix_core::{NodeId, PropertyId, PropertyValue, Result, VixError};

use crate::node::Node;
use crate::runtime::JobOp;
use crate::vm::snapshot_job;

/// A snapshot opened through a [`crate::VirtualMachine`].
pub struct Snapshot {
    node: Arc<Node>,
}

impl Snapshot {
    pub(crate) fn new(node: Arc<Node>) -> Self {
        Self { node }
    }

    pub(crate) fn node(&self) -> &Node {
        &self.node
    }

    /// Client-side identity of this snapshot.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// The owning VM, while both are open.
    #[must_use]
    pub fn parent_id(&self) -> Option<NodeId> {
        self.node.parent_id()
    }

    /// When this snapshot was opened.
    #[must_use]
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.node.opened_at()
    }

    /// Returns `true` once this snapshot has been closed, directly or by a
    /// cascade from its owner.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.node.is_closed()
    }

    /// Release the snapshot handle and detach from the owning VM.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if already closed.
    pub fn close(&self) -> Result<()> {
        self.node.close()
    }

    /// Read any snapshot property.
    ///
    /// # Errors
    /// Returns [`VixError::Internal`] if the property is undefined for
    /// snapshots.
    pub fn property(&self, id: PropertyId) -> Result<PropertyValue> {
        self.node.property(id)
    }

    /// The name given when the snapshot was taken.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if closed.
    pub fn display_name(&self) -> Result<String> {
        self.node.string_property(PropertyId::SNAPSHOT_DISPLAYNAME)
    }

    /// The description given when the snapshot was taken.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if closed.
    pub fn description(&self) -> Result<String> {
        self.node.string_property(PropertyId::SNAPSHOT_DESCRIPTION)
    }

    /// Revert the owning VM to this snapshot.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if this snapshot or its VM is
    /// closed.
    pub fn revert(&self) -> Result<()> {
        let vm = self.owner()?;
        snapshot_job(&vm, &self.node, |snapshot| JobOp::RevertToSnapshot { snapshot })
    }

    /// Delete this snapshot from the host. The object stays open.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if this snapshot or its VM is
    /// closed.
    pub fn remove(&self) -> Result<()> {
        let vm = self.owner()?;
        snapshot_job(&vm, &self.node, |snapshot| JobOp::RemoveSnapshot { snapshot })
    }

    fn owner(&self) -> Result<Arc<Node>> {
        self.node.handle()?;
        self.node
            .parent()
            .ok_or_else(|| VixError::not_open(crate::node::NodeKind::VirtualMachine.label()))
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("id", &self.node.id())
            .field("closed", &self.node.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        if self.node.is_closed() {
            return;
        }
        if let Err(e) = self.node.close() {
            tracing::debug!(snapshot = %self.node.id(), error = %e, "close on drop skipped");
        }
    }
}
