//! Virtual machine operations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use vix_core::{tools_state, NativeHandle, NodeId, PropertyId, PropertyValue, Result, VixError};

use crate::config::{Credentials, SnapshotSpec};
use crate::node::{Node, NodeKind};
use crate::runtime::JobOp;
use crate::snapshot::Snapshot;

/// A VM opened through a [`crate::Connection`].
///
/// Owns the snapshots obtained through it. Every operation fails with
/// [`VixError::ClientProgrammer`] once the VM (or its connection) is
/// closed.
pub struct VirtualMachine {
    node: Arc<Node>,
    vmx_path: String,
}

impl VirtualMachine {
    pub(crate) fn new(node: Arc<Node>, vmx_path: String) -> Self {
        Self { node, vmx_path }
    }

    /// Client-side identity of this VM.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// The owning connection, while both are open.
    #[must_use]
    pub fn parent_id(&self) -> Option<NodeId> {
        self.node.parent_id()
    }

    /// Configuration path the VM was opened with.
    #[must_use]
    pub fn vmx_path(&self) -> &str {
        &self.vmx_path
    }

    /// When this VM was opened.
    #[must_use]
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.node.opened_at()
    }

    /// Returns `true` once this VM has been closed, directly or by a
    /// cascade from its owner.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.node.is_closed()
    }

    /// Number of snapshots currently open through this VM.
    #[must_use]
    pub fn open_snapshot_count(&self) -> usize {
        self.node.child_count()
    }

    /// Close this VM's snapshots, release the VM and detach it from its
    /// connection.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if already closed.
    pub fn close(&self) -> Result<()> {
        self.node.close()?;
        tracing::info!(vm = %self.node.id(), vmx_path = %self.vmx_path, "VM closed");
        Ok(())
    }

    /// Read any VM property.
    ///
    /// # Errors
    /// Returns [`VixError::Internal`] if the property is undefined for VMs.
    pub fn property(&self, id: PropertyId) -> Result<PropertyValue> {
        self.node.property(id)
    }

    /// The `VIX_POWERSTATE_*` bitmask.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if closed.
    pub fn power_state(&self) -> Result<i32> {
        self.node.int_property(PropertyId::VM_POWER_STATE)
    }

    /// One of the `VIX_TOOLSSTATE_*` values.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if closed.
    pub fn tools_state(&self) -> Result<i32> {
        self.node.int_property(PropertyId::VM_TOOLS_STATE)
    }

    /// Whether the VM is powered on.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if closed.
    pub fn is_running(&self) -> Result<bool> {
        self.node.bool_property(PropertyId::VM_IS_RUNNING)
    }

    /// Number of virtual CPUs.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if closed.
    pub fn num_vcpus(&self) -> Result<i32> {
        self.node.int_property(PropertyId::VM_NUM_VCPUS)
    }

    /// Memory size in megabytes.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if closed.
    pub fn memory_size(&self) -> Result<i32> {
        self.node.int_property(PropertyId::VM_MEMORY_SIZE)
    }

    fn power_op(&self, op: JobOp) -> Result<()> {
        let operation = op.name();
        self.node.run_job(op)?;
        tracing::info!(vm = %self.node.id(), vmx_path = %self.vmx_path, operation, "power operation completed");
        Ok(())
    }

    /// Power the VM on.
    ///
    /// # Errors
    /// Returns a [`VixError::Operation`] if the VM is already running.
    pub fn power_on(&self) -> Result<()> {
        self.power_op(JobOp::PowerOn)
    }

    /// Power the VM off.
    ///
    /// # Errors
    /// Returns a [`VixError::Operation`] if the VM is not running.
    pub fn power_off(&self) -> Result<()> {
        self.power_op(JobOp::PowerOff)
    }

    /// Suspend the VM to disk.
    ///
    /// # Errors
    /// Returns a [`VixError::Operation`] if the VM is not running.
    pub fn suspend(&self) -> Result<()> {
        self.power_op(JobOp::Suspend)
    }

    /// Reset a running VM.
    ///
    /// # Errors
    /// Returns a [`VixError::Operation`] if the VM is not running.
    pub fn reset(&self) -> Result<()> {
        self.power_op(JobOp::Reset)
    }

    /// Upgrade the VM's virtual hardware to the host's current version.
    ///
    /// # Errors
    /// Returns a [`VixError::Operation`] if the VM is running or already up
    /// to date.
    pub fn upgrade_virtual_hardware(&self) -> Result<()> {
        self.node.run_job(JobOp::UpgradeVirtualHardware).map(drop)
    }

    /// Start installing the guest tools.
    ///
    /// # Errors
    /// Returns a [`VixError::Operation`] if the VM is not running.
    pub fn install_tools(&self) -> Result<()> {
        self.node.run_job(JobOp::InstallTools).map(drop)
    }

    /// Delete the VM's files from the host. The VM object stays open and
    /// must still be closed; further operations fail on the host side.
    ///
    /// # Errors
    /// Returns a [`VixError::Operation`] if the VM is running.
    pub fn delete(&self) -> Result<()> {
        self.node.run_job(JobOp::Delete)?;
        tracing::warn!(vm = %self.node.id(), vmx_path = %self.vmx_path, "VM deleted from host");
        Ok(())
    }

    /// Block until the guest tools are running, without limit.
    ///
    /// # Errors
    /// Returns a [`VixError::Operation`] if the VM is not running.
    pub fn wait_for_tools_in_guest(&self) -> Result<()> {
        self.node.run_job(JobOp::WaitForTools { timeout: None }).map(drop)
    }

    /// Wait up to `timeout` for the guest tools. Returns `false` if they
    /// were not running when the wait ended.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if closed, or the classified
    /// job failure.
    pub fn wait_for_tools_in_guest_timeout(&self, timeout: Duration) -> Result<bool> {
        self.node.run_job(JobOp::WaitForTools { timeout: Some(timeout) })?;
        Ok(self.tools_state()? == tools_state::RUNNING)
    }

    /// Number of root snapshots on the host.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if closed.
    pub fn root_snapshot_count(&self) -> Result<usize> {
        let handle = self.node.handle()?;
        self.node
            .runtime()
            .root_snapshot_count(handle)
            .map_err(|code| VixError::from_status("get root snapshot count", code))
    }

    /// Open every root snapshot. Each returned snapshot is owned by this VM.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if closed, or the runtime's
    /// failure; snapshots opened before the failure are closed again.
    pub fn root_snapshots(&self) -> Result<Vec<Snapshot>> {
        let count = self.root_snapshot_count()?;
        let mut snapshots = Vec::with_capacity(count);
        for index in 0..count {
            let handle = self
                .node
                .runtime()
                .root_snapshot(self.node.handle()?, index)
                .map_err(|code| VixError::from_status("get root snapshot", code))?;
            snapshots.push(self.adopt_snapshot(handle)?);
        }
        Ok(snapshots)
    }

    /// Take a snapshot of the VM.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if closed, or the classified
    /// job failure.
    pub fn create_snapshot(&self, spec: &SnapshotSpec) -> Result<Snapshot> {
        let result = self.node.run_child_job(JobOp::CreateSnapshot {
            name: spec.name.clone(),
            description: spec.description.clone(),
        })?;
        let handle = result
            .handle
            .filter(|h| h.is_valid())
            .ok_or_else(|| VixError::internal("create snapshot", "the host returned no snapshot handle"))?;
        let snapshot = self.adopt_snapshot(handle)?;
        tracing::info!(vm = %self.node.id(), snapshot = %snapshot.id(), name = spec.name.as_deref().unwrap_or(""), "created snapshot");
        Ok(snapshot)
    }

    fn adopt_snapshot(&self, handle: NativeHandle) -> Result<Snapshot> {
        let node = self.node.attach_child(NodeKind::Snapshot, handle)?;
        Ok(Snapshot::new(node))
    }

    /// Revert the VM to `snapshot`, which must be open and belong to this
    /// VM.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] for a closed or foreign
    /// snapshot, otherwise the classified job failure.
    pub fn revert_to_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        snapshot_job(&self.node, snapshot.node(), |snapshot| JobOp::RevertToSnapshot { snapshot })
    }

    /// Delete `snapshot` from the host. The snapshot object stays open and
    /// must still be closed.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] for a closed or foreign
    /// snapshot, otherwise the classified job failure.
    pub fn remove_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        snapshot_job(&self.node, snapshot.node(), |snapshot| JobOp::RemoveSnapshot { snapshot })
    }

    /// Authenticate with the guest OS. Required before any guest program or
    /// file operation.
    ///
    /// # Errors
    /// Returns [`VixError::Security`] if the guest rejects the credentials.
    pub fn login_in_guest(&self, credentials: &Credentials) -> Result<()> {
        self.node.run_job(JobOp::LoginInGuest {
            credentials: credentials.clone(),
        })?;
        tracing::info!(vm = %self.node.id(), user = %credentials.username, "logged in to guest");
        Ok(())
    }

    /// Run `program` in the guest and wait for it to exit. Returns the
    /// exit code when the guest reports one.
    ///
    /// # Errors
    /// Returns [`VixError::Security`] if not logged in, or a
    /// [`VixError::Operation`] if the program cannot be started.
    pub fn run_program_in_guest(&self, program: &str, command_line: &str) -> Result<Option<i32>> {
        let result = self.node.run_job(JobOp::RunProgramInGuest {
            program: program.to_owned(),
            command_line: command_line.to_owned(),
        })?;
        tracing::debug!(vm = %self.node.id(), program, exit_code = ?result.exit_code, "guest program finished");
        Ok(result.exit_code)
    }

    /// Copy a host file into the guest file system.
    ///
    /// # Errors
    /// Returns [`VixError::Security`] if not logged in, or a
    /// [`VixError::Operation`] if the source cannot be read.
    pub fn copy_file_from_host_to_guest(&self, host_path: &Path, guest_path: &str) -> Result<()> {
        self.node
            .run_job(JobOp::CopyFileFromHostToGuest {
                source: host_path.to_path_buf(),
                destination: guest_path.to_owned(),
            })
            .map(drop)
    }

    /// Copy a guest file out to the host.
    ///
    /// # Errors
    /// Returns [`VixError::Security`] if not logged in, or a
    /// [`VixError::Operation`] if the guest file does not exist.
    pub fn copy_file_from_guest_to_host(&self, guest_path: &str, host_path: &Path) -> Result<()> {
        self.node
            .run_job(JobOp::CopyFileFromGuestToHost {
                source: guest_path.to_owned(),
                destination: host_path.to_path_buf(),
            })
            .map(drop)
    }
}

/// Run a job on `vm` that names one of its snapshots.
pub(crate) fn snapshot_job(vm: &Node, snapshot: &Node, op: impl FnOnce(NativeHandle) -> JobOp) -> Result<()> {
    let snapshot_handle = snapshot.handle()?;
    if snapshot.parent_id() != Some(vm.id()) {
        return Err(VixError::ClientProgrammer(
            "the snapshot does not belong to this VM".to_owned(),
        ));
    }
    let op = op(snapshot_handle);
    let operation = op.name();
    vm.run_job(op)?;
    tracing::info!(vm = %vm.id(), snapshot = %snapshot.id(), operation, "snapshot operation completed");
    Ok(())
}

impl std::fmt::Debug for VirtualMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualMachine")
            .field("id", &self.node.id())
            .field("vmx_path", &self.vmx_path)
            .field("closed", &self.node.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for VirtualMachine {
    fn drop(&mut self) {
        if self.node.is_closed() {
            return;
        }
        if let Err(e) = self.node.close() {
            tracing::debug!(vm = %self.node.id(), error = %e, "close on drop skipped");
        }
    }
}
