//! Host-side client for the VIX virtual machine management API.
//!
//! The client drives a native [`ManagementRuntime`] through a tree of
//! handle objects:
//!
//! ```text
//! Connection ──owns──▶ VirtualMachine ──owns──▶ Snapshot
//! ```
//!
//! Every operation is a blocking call: it issues an asynchronous job to the
//! runtime and waits for the runtime's worker to complete it. Closing (or
//! dropping) any object closes its descendants first, then releases its own
//! runtime handle, exactly once.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use vix_client::sim::{SimVm, SimulatedRuntime};
//! use vix_client::{Connection, ConnectionConfig};
//!
//! # fn main() -> vix_client::Result<()> {
//! let runtime = Arc::new(
//!     SimulatedRuntime::builder()
//!         .with_vm("/vms/web.vmx", SimVm::new())
//!         .build()?,
//! );
//! let conn = Connection::connect(runtime, &ConnectionConfig::local())?;
//! let vm = conn.open_vm("/vms/web.vmx")?;
//! vm.power_on()?;
//! conn.close()?; // closes `vm` too
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod connection;
mod node;
pub mod property;
pub mod runtime;
pub mod sim;
pub mod snapshot;
pub mod vm;
pub mod waiter;

pub use config::{ConnectionConfig, Credentials, SnapshotSpec};
pub use connection::Connection;
pub use runtime::{job_channel, JobHandle, JobNotifier, JobOp, JobOutcome, JobResult, ManagementRuntime};
pub use snapshot::Snapshot;
pub use vix_core::{
    constant, constants, power_state, tools_state, ErrorKind, JobId, NativeHandle, NodeId, PropertyId, PropertyValue,
    Result, ServiceProvider, StatusCode, VixError,
};
pub use vm::VirtualMachine;
pub use waiter::JobWaiter;
