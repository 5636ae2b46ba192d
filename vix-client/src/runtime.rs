//! Management runtime abstraction.
//!
//! The runtime is the native library that speaks to the management host and
//! to guest agents. The client never sees its wire protocol: it issues jobs,
//! reads properties and releases handles through [`ManagementRuntime`], and
//! receives job completions through a one-shot channel that the runtime
//! completes from its own worker context.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use vix_core::{ConstantTable, JobId, NativeHandle, PropertyId, PropertyValue, StatusCode};

use crate::config::{ConnectionConfig, Credentials};

/// Terminal status of a job: its result, or the failure code.
pub type JobOutcome = Result<JobResult, StatusCode>;

/// Values produced by a successful job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct JobResult {
    /// Handle created by the job (host connection, opened VM, snapshot).
    pub handle: Option<NativeHandle>,
    /// Items reported by enumeration jobs, in runtime order.
    pub items: Vec<String>,
    /// Exit code of a guest program, when the runtime reports one.
    pub exit_code: Option<i32>,
}

impl JobResult {
    /// A result carrying no values.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result carrying a newly created handle.
    #[must_use]
    pub fn with_handle(handle: NativeHandle) -> Self {
        Self {
            handle: Some(handle),
            ..Self::default()
        }
    }

    /// A result carrying enumerated items.
    #[must_use]
    pub fn with_items(items: Vec<String>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    /// A result carrying a guest program's exit code.
    #[must_use]
    pub fn with_exit_code(exit_code: i32) -> Self {
        Self {
            exit_code: Some(exit_code),
            ..Self::default()
        }
    }
}

/// An operation the runtime executes asynchronously against a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum JobOp {
    FindRunningVms,
    RegisterVm { path: String },
    UnregisterVm { path: String },
    OpenVm { path: String },
    PowerOn,
    PowerOff,
    Suspend,
    Reset,
    UpgradeVirtualHardware,
    InstallTools,
    Delete,
    /// Wait for the guest agent. `None` waits without limit.
    WaitForTools { timeout: Option<Duration> },
    CreateSnapshot {
        name: Option<String>,
        description: Option<String>,
    },
    RemoveSnapshot { snapshot: NativeHandle },
    RevertToSnapshot { snapshot: NativeHandle },
    LoginInGuest { credentials: Credentials },
    RunProgramInGuest { program: String, command_line: String },
    CopyFileFromHostToGuest { source: PathBuf, destination: String },
    CopyFileFromGuestToHost { source: String, destination: PathBuf },
}

impl JobOp {
    /// Short operation name used in errors and logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            JobOp::FindRunningVms => "find running VMs",
            JobOp::RegisterVm { .. } => "register VM",
            JobOp::UnregisterVm { .. } => "unregister VM",
            JobOp::OpenVm { .. } => "open VM",
            JobOp::PowerOn => "power on",
            JobOp::PowerOff => "power off",
            JobOp::Suspend => "suspend",
            JobOp::Reset => "reset",
            JobOp::UpgradeVirtualHardware => "upgrade virtual hardware",
            JobOp::InstallTools => "install tools",
            JobOp::Delete => "delete VM",
            JobOp::WaitForTools { .. } => "wait for tools in guest",
            JobOp::CreateSnapshot { .. } => "create snapshot",
            JobOp::RemoveSnapshot { .. } => "remove snapshot",
            JobOp::RevertToSnapshot { .. } => "revert to snapshot",
            JobOp::LoginInGuest { .. } => "login in guest",
            JobOp::RunProgramInGuest { .. } => "run program in guest",
            JobOp::CopyFileFromHostToGuest { .. } => "copy file from host to guest",
            JobOp::CopyFileFromGuestToHost { .. } => "copy file from guest to host",
        }
    }
}

/// Runtime-side end of a job: completes the job exactly once.
#[derive(Debug)]
pub struct JobNotifier {
    id: JobId,
    tx: oneshot::Sender<JobOutcome>,
}

impl JobNotifier {
    /// The job being completed.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Deliver the job's terminal status. Safe to call from any thread.
    pub fn complete(self, outcome: JobOutcome) {
        if self.tx.send(outcome).is_err() {
            tracing::debug!(job = %self.id, "job completed after its waiter went away");
        }
    }
}

/// Client-side end of a job.
///
/// Dropping a `JobHandle` abandons interest in the outcome; the job itself
/// keeps running on the host.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    rx: oneshot::Receiver<JobOutcome>,
    delivered: Option<JobOutcome>,
}

impl JobHandle {
    /// The job this handle observes.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Non-blocking poll: `true` once the runtime has delivered a terminal
    /// status, or has given up on the job without delivering one.
    pub fn is_complete(&mut self) -> bool {
        if self.delivered.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(outcome) => {
                self.delivered = Some(outcome);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Closed) => true,
        }
    }

    pub(crate) fn into_parts(self) -> (JobId, Option<JobOutcome>, oneshot::Receiver<JobOutcome>) {
        (self.id, self.delivered, self.rx)
    }
}

/// Create the two ends of a job's completion channel.
#[must_use]
pub fn job_channel(id: JobId) -> (JobNotifier, JobHandle) {
    let (tx, rx) = oneshot::channel();
    (
        JobNotifier { id, tx },
        JobHandle {
            id,
            rx,
            delivered: None,
        },
    )
}

/// The native management runtime the client drives.
///
/// Implementations must be `Send + Sync`: completions are delivered from
/// the runtime's own worker while client threads issue calls.
///
/// Failures are reported as raw [`StatusCode`]s; the client translates them
/// into [`vix_core::VixError`]s.
pub trait ManagementRuntime: Send + Sync {
    /// Start connecting to a management host. The job's result carries the
    /// host handle.
    ///
    /// # Errors
    /// Returns a status code if the job cannot even be issued.
    fn connect(&self, config: &ConnectionConfig) -> Result<JobHandle, StatusCode>;

    /// Tear down a host connection. Every handle obtained through it becomes
    /// invalid and must not be released afterwards.
    fn disconnect(&self, host: NativeHandle);

    /// Issue an asynchronous job against `target`.
    ///
    /// # Errors
    /// Returns a status code if the job cannot even be issued.
    fn issue_job(&self, target: NativeHandle, op: JobOp) -> Result<JobHandle, StatusCode>;

    /// Read one property of a handle.
    ///
    /// # Errors
    /// Returns [`StatusCode::UNRECOGNIZED_PROPERTY`] for a property the
    /// handle's type does not define, [`StatusCode::INVALID_HANDLE`] for a
    /// stale handle.
    fn get_property(&self, handle: NativeHandle, property: PropertyId) -> Result<PropertyValue, StatusCode>;

    /// Release a non-host handle.
    fn release_handle(&self, handle: NativeHandle);

    /// Number of root snapshots of a VM.
    ///
    /// # Errors
    /// Returns a status code if `vm` is not a valid VM handle.
    fn root_snapshot_count(&self, vm: NativeHandle) -> Result<usize, StatusCode>;

    /// Obtain a new handle for the root snapshot at `index`.
    ///
    /// # Errors
    /// Returns a status code if `vm` is invalid or `index` is out of range.
    fn root_snapshot(&self, vm: NativeHandle, index: usize) -> Result<NativeHandle, StatusCode>;

    /// The runtime's constant table. Queried once per process.
    fn constant_table(&self) -> ConstantTable {
        ConstantTable::builtin()
    }
}
