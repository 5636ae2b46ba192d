//! Host connection: the root of the handle tree.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use vix_core::{init_constants, NodeId, PropertyId, PropertyValue, Result, StatusCode, VixError};

use crate::config::ConnectionConfig;
use crate::node::{Node, NodeKind};
use crate::runtime::{JobOp, ManagementRuntime};
use crate::vm::VirtualMachine;
use crate::waiter::JobWaiter;

/// An open connection to a management host.
///
/// Owns every VM opened through it. Closing the connection (explicitly or by
/// dropping it) closes those VMs and their snapshots first, then
/// disconnects.
pub struct Connection {
    node: Arc<Node>,
    host_name: Option<String>,
    username: Option<String>,
}

impl Connection {
    /// Connect to the host described by `config`.
    ///
    /// Loads the process-wide constant table from `runtime` on first use.
    ///
    /// # Errors
    /// Returns [`VixError::Security`] without contacting the host if a
    /// remote host is named but no credentials are given, or if the host
    /// rejects the credentials. Transport failures are
    /// [`VixError::Internal`].
    pub fn connect(runtime: Arc<dyn ManagementRuntime>, config: &ConnectionConfig) -> Result<Self> {
        if let (Some(host), None) = (&config.host_name, &config.credentials) {
            return Err(VixError::Security {
                operation: "connect",
                code: StatusCode::HOST_USER_PERMISSIONS,
                message: format!("credentials are required to connect to {host}"),
            });
        }

        init_constants(|| runtime.constant_table());

        let waiter = config.job_timeout().map_or_else(JobWaiter::new, JobWaiter::with_timeout);
        let job = runtime
            .connect(config)
            .map_err(|code| VixError::from_status("connect", code))?;
        let late_runtime = Arc::clone(&runtime);
        let result = waiter.wait_for_with_cleanup(job, "connect", move |late| {
            if let Some(orphan) = late.handle.filter(|h| h.is_valid()) {
                tracing::debug!(handle = %orphan, "disconnecting host handle of abandoned connect");
                late_runtime.disconnect(orphan);
            }
        })?;
        let handle = result
            .handle
            .filter(|h| h.is_valid())
            .ok_or_else(|| VixError::internal("connect", "the host returned no connection handle"))?;

        let node = Node::new_root(runtime, waiter, NodeKind::Connection, handle);
        tracing::info!(
            connection = %node.id(),
            host = config.host_name.as_deref().unwrap_or("localhost"),
            provider = ?config.provider,
            "connected to management host"
        );

        Ok(Self {
            node,
            host_name: config.host_name.clone(),
            username: config.credentials.as_ref().map(|c| c.username.clone()),
        })
    }

    /// Client-side identity of this connection.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// The host this connection targets; `None` for the local host.
    #[must_use]
    pub fn host_name(&self) -> Option<&str> {
        self.host_name.as_deref()
    }

    /// The account used to log in to the host; `None` for the local host.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// When this connection was opened.
    #[must_use]
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.node.opened_at()
    }

    /// Returns `true` once this connection has been closed, directly or by a
    /// cascade from its owner.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.node.is_closed()
    }

    /// Number of VMs currently open through this connection.
    #[must_use]
    pub fn open_vm_count(&self) -> usize {
        self.node.child_count()
    }

    /// Close every VM opened through this connection, then disconnect.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if already closed.
    pub fn close(&self) -> Result<()> {
        let vms = self.node.child_count();
        self.node.close()?;
        tracing::info!(connection = %self.node.id(), vms, "connection closed");
        Ok(())
    }

    /// Paths of the VMs currently running on the host.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if the connection is closed,
    /// otherwise the classified job failure.
    pub fn find_running_vm_paths(&self) -> Result<Vec<String>> {
        Ok(self.node.run_job(JobOp::FindRunningVms)?.items)
    }

    /// Register a VM configuration file with the host. Registering a VM
    /// that is already registered succeeds.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if the connection is closed,
    /// otherwise the classified job failure.
    pub fn register_vm(&self, vmx_path: &str) -> Result<()> {
        match self.node.run_job(JobOp::RegisterVm { path: vmx_path.to_owned() }) {
            Ok(_) => {
                tracing::info!(connection = %self.node.id(), vmx_path, "registered VM");
                Ok(())
            }
            Err(e) if e.has_code(StatusCode::VM_ALREADY_LOADED) => {
                tracing::debug!(vmx_path, "VM already registered");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove a VM from the host's inventory. Unregistering a VM that is
    /// not registered succeeds.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if the connection is closed,
    /// otherwise the classified job failure.
    pub fn unregister_vm(&self, vmx_path: &str) -> Result<()> {
        match self.node.run_job(JobOp::UnregisterVm { path: vmx_path.to_owned() }) {
            Ok(_) => {
                tracing::info!(connection = %self.node.id(), vmx_path, "unregistered VM");
                Ok(())
            }
            Err(e) if e.has_code(StatusCode::VM_NOT_FOUND) => {
                tracing::debug!(vmx_path, "VM was not registered");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Open a VM by its configuration path. The VM is owned by this
    /// connection and is closed when the connection closes.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if the connection is closed
    /// (including when it closes while the open is in flight), otherwise the
    /// classified job failure.
    pub fn open_vm(&self, vmx_path: &str) -> Result<VirtualMachine> {
        let result = self.node.run_child_job(JobOp::OpenVm { path: vmx_path.to_owned() })?;
        let handle = result
            .handle
            .filter(|h| h.is_valid())
            .ok_or_else(|| VixError::internal("open VM", "the host returned no VM handle"))?;
        let node = self.node.attach_child(NodeKind::VirtualMachine, handle)?;
        tracing::info!(connection = %self.node.id(), vm = %node.id(), vmx_path, "opened VM");
        Ok(VirtualMachine::new(node, vmx_path.to_owned()))
    }

    /// Read a host property such as [`PropertyId::HOST_HOSTTYPE`].
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if closed, or
    /// [`VixError::Internal`] if the property is undefined for hosts.
    pub fn property(&self, id: PropertyId) -> Result<PropertyValue> {
        self.node.property(id)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.node.id())
            .field("host_name", &self.host_name)
            .field("username", &self.username)
            .field("closed", &self.node.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.node.is_closed() {
            return;
        }
        if let Err(e) = self.node.close() {
            tracing::debug!(connection = %self.node.id(), error = %e, "close on drop skipped");
        }
    }
}
