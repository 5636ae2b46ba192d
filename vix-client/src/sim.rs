//! In-process management host.
//!
//! [`SimulatedRuntime`] implements [`ManagementRuntime`] over an in-memory
//! inventory of VMs. Jobs are queued to a dedicated worker thread and
//! completed from there, so callers go through the same cross-thread
//! completion path as with a native runtime. It also keeps handle
//! accounting (live handles, releases of stale handles) so tests can assert
//! that every handle is released exactly once.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use vix_core::{
    power_state, tools_state, JobId, NativeHandle, PropertyId, PropertyValue, Result, ServiceProvider, StatusCode,
    VixError,
};

use crate::config::{ConnectionConfig, Credentials};
use crate::runtime::{job_channel, JobHandle, JobNotifier, JobOp, JobOutcome, JobResult, ManagementRuntime};

/// Hardware version a simulated host upgrades VMs to.
pub const LATEST_HARDWARE_VERSION: u32 = 7;

const API_VERSION: i32 = 1;

#[derive(Debug, Clone)]
struct SimSnapshot {
    id: u64,
    name: String,
    description: String,
    power_state: i32,
}

/// One VM in the simulated inventory.
#[derive(Debug, Clone)]
pub struct SimVm {
    registered: bool,
    power: i32,
    tools_installed: bool,
    tools_running: bool,
    num_vcpus: i32,
    memory_mb: i32,
    hardware_version: u32,
    snapshots: Vec<SimSnapshot>,
    guest_accounts: BTreeMap<String, String>,
    guest_programs: BTreeMap<String, i32>,
    guest_files: BTreeMap<String, Vec<u8>>,
}

impl Default for SimVm {
    fn default() -> Self {
        Self::new()
    }
}

impl SimVm {
    /// A registered, powered-off VM with tools installed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registered: true,
            power: power_state::POWERED_OFF,
            tools_installed: true,
            tools_running: false,
            num_vcpus: 1,
            memory_mb: 512,
            hardware_version: LATEST_HARDWARE_VERSION,
            snapshots: Vec::new(),
            guest_accounts: BTreeMap::new(),
            guest_programs: BTreeMap::new(),
            guest_files: BTreeMap::new(),
        }
    }

    /// Start the VM powered on, tools not yet answering.
    #[must_use]
    pub fn powered_on(mut self) -> Self {
        self.power = power_state::POWERED_ON;
        self
    }

    /// Powered on with the guest tools already answering.
    #[must_use]
    pub fn with_tools_running(mut self) -> Self {
        self.power = power_state::POWERED_ON;
        self.tools_installed = true;
        self.tools_running = true;
        self
    }

    /// Start the VM suspended.
    #[must_use]
    pub fn suspended(mut self) -> Self {
        self.power = power_state::SUSPENDED;
        self
    }

    /// Keep the VM file on disk but out of the host inventory.
    #[must_use]
    pub fn unregistered(mut self) -> Self {
        self.registered = false;
        self
    }

    /// A guest with no tools installed.
    #[must_use]
    pub fn without_tools(mut self) -> Self {
        self.tools_installed = false;
        self.tools_running = false;
        self
    }

    /// Number of virtual CPUs reported by the VM.
    #[must_use]
    pub fn with_vcpus(mut self, vcpus: i32) -> Self {
        self.num_vcpus = vcpus;
        self
    }

    /// Memory size reported by the VM, in megabytes.
    #[must_use]
    pub fn with_memory_mb(mut self, memory_mb: i32) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    /// Virtual hardware version. Below [`LATEST_HARDWARE_VERSION`] the VM
    /// can be upgraded.
    #[must_use]
    pub fn with_hardware_version(mut self, version: u32) -> Self {
        self.hardware_version = version;
        self
    }

    /// Add a root snapshot captured in the VM's current power state.
    #[must_use]
    pub fn with_snapshot(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        let power_state = self.power_state();
        self.snapshots.push(SimSnapshot {
            id: 0,
            name: name.into(),
            description: description.into(),
            power_state,
        });
        self
    }

    /// Accept guest logins for `username` with `password`.
    #[must_use]
    pub fn with_guest_account(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.guest_accounts.insert(username.into(), password.into());
        self
    }

    /// Make `program` runnable in the guest, exiting with `exit_code`.
    #[must_use]
    pub fn with_guest_program(mut self, program: impl Into<String>, exit_code: i32) -> Self {
        self.guest_programs.insert(program.into(), exit_code);
        self
    }

    /// Seed a file in the guest file system.
    #[must_use]
    pub fn with_guest_file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.guest_files.insert(path.into(), contents.into());
        self
    }

    fn is_on(&self) -> bool {
        self.power & power_state::POWERED_ON != 0
    }

    fn power_state(&self) -> i32 {
        if self.tools_running {
            self.power | power_state::TOOLS_RUNNING
        } else {
            self.power
        }
    }

    fn tools_state(&self) -> i32 {
        if !self.tools_installed {
            tools_state::NOT_INSTALLED
        } else if self.tools_running {
            tools_state::RUNNING
        } else {
            tools_state::UNKNOWN
        }
    }

    fn set_power(&mut self, power: i32) {
        self.power = power;
        self.tools_running = false;
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Host {
        provider: ServiceProvider,
    },
    Vm {
        host: NativeHandle,
        path: String,
        logged_in: bool,
    },
    Snapshot {
        host: NativeHandle,
        vm_path: String,
        snapshot: u64,
    },
}

impl Entry {
    fn host(&self) -> Option<NativeHandle> {
        match self {
            Entry::Host { .. } => None,
            Entry::Vm { host, .. } | Entry::Snapshot { host, .. } => Some(*host),
        }
    }
}

struct VmTarget {
    host: NativeHandle,
    path: String,
    logged_in: bool,
}

#[derive(Default)]
struct SimState {
    vms: BTreeMap<String, SimVm>,
    host_accounts: BTreeMap<String, Credentials>,
    sticky_auth_failure: bool,
    refused_hosts: BTreeSet<String>,
    handles: BTreeMap<NativeHandle, Entry>,
    next_handle: u64,
    next_snapshot: u64,
    released: usize,
    disconnects: usize,
    stale_releases: usize,
}

impl SimState {
    fn allocate(&mut self, entry: Entry) -> NativeHandle {
        self.next_handle += 1;
        let handle = NativeHandle(self.next_handle);
        self.handles.insert(handle, entry);
        handle
    }

    fn next_snapshot_id(&mut self) -> u64 {
        self.next_snapshot += 1;
        self.next_snapshot
    }

    fn host_target(&self, target: NativeHandle) -> std::result::Result<NativeHandle, StatusCode> {
        match self.handles.get(&target) {
            Some(Entry::Host { .. }) => Ok(target),
            Some(_) => Err(StatusCode::NOT_SUPPORTED_ON_HANDLE_TYPE),
            None => Err(StatusCode::INVALID_HANDLE),
        }
    }

    fn vm_target(&self, target: NativeHandle) -> std::result::Result<VmTarget, StatusCode> {
        match self.handles.get(&target) {
            Some(Entry::Vm { host, path, logged_in }) => Ok(VmTarget {
                host: *host,
                path: path.clone(),
                logged_in: *logged_in,
            }),
            Some(_) => Err(StatusCode::NOT_SUPPORTED_ON_HANDLE_TYPE),
            None => Err(StatusCode::INVALID_HANDLE),
        }
    }

    fn vm_mut(&mut self, path: &str) -> std::result::Result<&mut SimVm, StatusCode> {
        self.vms.get_mut(path).ok_or(StatusCode::VM_NOT_FOUND)
    }

    /// Resolve a snapshot handle that must belong to the VM at `vm_path`.
    fn snapshot_of(&self, snapshot: NativeHandle, vm_path: &str) -> std::result::Result<u64, StatusCode> {
        match self.handles.get(&snapshot) {
            Some(Entry::Snapshot { vm_path: owner, snapshot, .. }) if owner == vm_path => Ok(*snapshot),
            Some(Entry::Snapshot { .. }) => Err(StatusCode::INVALID_ARG),
            Some(_) => Err(StatusCode::NOT_SUPPORTED_ON_HANDLE_TYPE),
            None => Err(StatusCode::INVALID_HANDLE),
        }
    }

    fn set_logged_in(&mut self, target: NativeHandle, value: bool) {
        if let Some(Entry::Vm { logged_in, .. }) = self.handles.get_mut(&target) {
            *logged_in = value;
        }
    }

    fn end_guest_sessions(&mut self, vm_path: &str) {
        for entry in self.handles.values_mut() {
            if let Entry::Vm { path, logged_in, .. } = entry {
                if path == vm_path {
                    *logged_in = false;
                }
            }
        }
    }

    fn connect(&mut self, config: &ConnectionConfig) -> JobOutcome {
        let Some(host) = config.host_name.as_deref() else {
            let handle = self.allocate(Entry::Host {
                provider: config.provider,
            });
            return Ok(JobResult::with_handle(handle));
        };

        if self.sticky_auth_failure && self.refused_hosts.contains(host) {
            return Err(StatusCode::HOST_USER_PERMISSIONS);
        }
        let Some(account) = self.host_accounts.get(host) else {
            return Err(StatusCode::CANNOT_CONNECT_TO_HOST);
        };
        if config.credentials.as_ref() != Some(account) {
            if self.sticky_auth_failure {
                self.refused_hosts.insert(host.to_owned());
            }
            return Err(StatusCode::HOST_USER_PERMISSIONS);
        }

        let handle = self.allocate(Entry::Host {
            provider: config.provider,
        });
        Ok(JobResult::with_handle(handle))
    }

    fn execute(&mut self, target: NativeHandle, op: JobOp) -> JobOutcome {
        match op {
            JobOp::FindRunningVms => {
                self.host_target(target)?;
                let running = self
                    .vms
                    .iter()
                    .filter(|(_, vm)| vm.registered && vm.is_on())
                    .map(|(path, _)| path.clone())
                    .collect();
                Ok(JobResult::with_items(running))
            }
            JobOp::RegisterVm { path } => {
                self.host_target(target)?;
                let vm = self.vms.get_mut(&path).ok_or(StatusCode::FILE_NOT_FOUND)?;
                if vm.registered {
                    return Err(StatusCode::VM_ALREADY_LOADED);
                }
                vm.registered = true;
                Ok(JobResult::empty())
            }
            JobOp::UnregisterVm { path } => {
                self.host_target(target)?;
                match self.vms.get_mut(&path) {
                    Some(vm) if vm.registered => {
                        if vm.is_on() {
                            return Err(StatusCode::VM_IS_RUNNING);
                        }
                        vm.registered = false;
                        Ok(JobResult::empty())
                    }
                    _ => Err(StatusCode::VM_NOT_FOUND),
                }
            }
            JobOp::OpenVm { path } => {
                let host = self.host_target(target)?;
                let vm = self.vms.get(&path).ok_or(StatusCode::FILE_NOT_FOUND)?;
                if !vm.registered {
                    return Err(StatusCode::VM_NOT_FOUND);
                }
                let handle = self.allocate(Entry::Vm {
                    host,
                    path,
                    logged_in: false,
                });
                Ok(JobResult::with_handle(handle))
            }
            op => {
                let vm = self.vm_target(target)?;
                self.execute_on_vm(target, &vm, op)
            }
        }
    }

    fn execute_on_vm(&mut self, target: NativeHandle, t: &VmTarget, op: JobOp) -> JobOutcome {
        match op {
            JobOp::PowerOn => {
                let vm = self.vm_mut(&t.path)?;
                if vm.is_on() {
                    return Err(StatusCode::VM_IS_RUNNING);
                }
                vm.set_power(power_state::POWERED_ON);
            }
            JobOp::PowerOff | JobOp::Suspend | JobOp::Reset => {
                let vm = self.vm_mut(&t.path)?;
                if !vm.is_on() {
                    return Err(StatusCode::VM_NOT_RUNNING);
                }
                vm.set_power(match op {
                    JobOp::PowerOff => power_state::POWERED_OFF,
                    JobOp::Suspend => power_state::SUSPENDED,
                    _ => power_state::POWERED_ON,
                });
                self.end_guest_sessions(&t.path);
            }
            JobOp::UpgradeVirtualHardware => {
                let vm = self.vm_mut(&t.path)?;
                if vm.is_on() {
                    return Err(StatusCode::VM_IS_RUNNING);
                }
                if vm.hardware_version >= LATEST_HARDWARE_VERSION {
                    return Err(StatusCode::VM_ALREADY_UP_TO_DATE);
                }
                vm.hardware_version = LATEST_HARDWARE_VERSION;
            }
            JobOp::InstallTools => {
                let vm = self.vm_mut(&t.path)?;
                if !vm.is_on() {
                    return Err(StatusCode::VM_NOT_RUNNING);
                }
                vm.tools_installed = true;
            }
            JobOp::Delete => {
                if self.vm_mut(&t.path)?.is_on() {
                    return Err(StatusCode::VM_IS_RUNNING);
                }
                self.vms.remove(&t.path);
            }
            JobOp::WaitForTools { timeout } => {
                let vm = self.vm_mut(&t.path)?;
                if vm.is_on() && vm.tools_installed {
                    vm.tools_running = true;
                } else if timeout.is_none() {
                    return Err(if vm.is_on() {
                        StatusCode::TIMEOUT_WAITING_FOR_TOOLS
                    } else {
                        StatusCode::VM_NOT_RUNNING
                    });
                }
            }
            JobOp::CreateSnapshot { name, description } => {
                let id = self.next_snapshot_id();
                let vm = self.vm_mut(&t.path)?;
                let power_state = vm.power_state();
                vm.snapshots.push(SimSnapshot {
                    id,
                    name: name.unwrap_or_default(),
                    description: description.unwrap_or_default(),
                    power_state,
                });
                let handle = self.allocate(Entry::Snapshot {
                    host: t.host,
                    vm_path: t.path.clone(),
                    snapshot: id,
                });
                return Ok(JobResult::with_handle(handle));
            }
            JobOp::RemoveSnapshot { snapshot } => {
                let id = self.snapshot_of(snapshot, &t.path)?;
                let vm = self.vm_mut(&t.path)?;
                let before = vm.snapshots.len();
                vm.snapshots.retain(|s| s.id != id);
                if vm.snapshots.len() == before {
                    return Err(StatusCode::SNAPSHOT_NOT_FOUND);
                }
            }
            JobOp::RevertToSnapshot { snapshot } => {
                let id = self.snapshot_of(snapshot, &t.path)?;
                let vm = self.vm_mut(&t.path)?;
                let saved = vm
                    .snapshots
                    .iter()
                    .find(|s| s.id == id)
                    .map(|s| s.power_state)
                    .ok_or(StatusCode::SNAPSHOT_NOT_FOUND)?;
                vm.set_power(saved & !power_state::TOOLS_RUNNING);
                self.end_guest_sessions(&t.path);
            }
            JobOp::LoginInGuest { credentials } => {
                let vm = self.vm_mut(&t.path)?;
                if !vm.is_on() {
                    return Err(StatusCode::VM_NOT_RUNNING);
                }
                if !vm.tools_running {
                    return Err(StatusCode::TOOLS_NOT_RUNNING);
                }
                if vm.guest_accounts.get(&credentials.username).map(String::as_str) != Some(credentials.password()) {
                    return Err(StatusCode::CANNOT_AUTHENTICATE_WITH_GUEST);
                }
                self.set_logged_in(target, true);
            }
            JobOp::RunProgramInGuest { program, .. } => {
                let vm = guest_session(self.vm_mut(&t.path)?, t)?;
                // Files copied into the guest run and exit cleanly.
                let exit_code = vm
                    .guest_programs
                    .get(&program)
                    .copied()
                    .or_else(|| vm.guest_files.contains_key(&program).then_some(0))
                    .ok_or(StatusCode::FILE_NOT_FOUND)?;
                return Ok(JobResult::with_exit_code(exit_code));
            }
            JobOp::CopyFileFromHostToGuest { source, destination } => {
                let vm = guest_session(self.vm_mut(&t.path)?, t)?;
                let contents = std::fs::read(&source).map_err(|_| StatusCode::FILE_NOT_FOUND)?;
                vm.guest_files.insert(destination, contents);
            }
            JobOp::CopyFileFromGuestToHost { source, destination } => {
                let vm = guest_session(self.vm_mut(&t.path)?, t)?;
                let contents = vm.guest_files.get(&source).ok_or(StatusCode::FILE_NOT_FOUND)?;
                std::fs::write(&destination, contents).map_err(|_| StatusCode::FILE_ERROR)?;
            }
            JobOp::FindRunningVms | JobOp::RegisterVm { .. } | JobOp::UnregisterVm { .. } | JobOp::OpenVm { .. } => {
                return Err(StatusCode::NOT_SUPPORTED_ON_HANDLE_TYPE);
            }
        }
        Ok(JobResult::empty())
    }

    fn property(&self, handle: NativeHandle, id: PropertyId) -> std::result::Result<PropertyValue, StatusCode> {
        match self.handles.get(&handle).ok_or(StatusCode::INVALID_HANDLE)? {
            Entry::Host { provider } => match id {
                PropertyId::HOST_HOSTTYPE => Ok(PropertyValue::Integer(i32::try_from(provider.code()).unwrap_or(0))),
                PropertyId::HOST_API_VERSION => Ok(PropertyValue::Integer(API_VERSION)),
                _ => Err(StatusCode::UNRECOGNIZED_PROPERTY),
            },
            Entry::Vm { path, .. } => {
                let vm = self.vms.get(path).ok_or(StatusCode::VM_NOT_FOUND)?;
                match id {
                    PropertyId::VM_VMX_PATHNAME => Ok(PropertyValue::String(path.clone())),
                    PropertyId::VM_POWER_STATE => Ok(PropertyValue::Integer(vm.power_state())),
                    PropertyId::VM_TOOLS_STATE => Ok(PropertyValue::Integer(vm.tools_state())),
                    PropertyId::VM_NUM_VCPUS => Ok(PropertyValue::Integer(vm.num_vcpus)),
                    PropertyId::VM_MEMORY_SIZE => Ok(PropertyValue::Integer(vm.memory_mb)),
                    PropertyId::VM_IS_RUNNING => Ok(PropertyValue::Bool(vm.is_on())),
                    PropertyId::VM_IN_VMTEAM => Ok(PropertyValue::Bool(false)),
                    _ => Err(StatusCode::UNRECOGNIZED_PROPERTY),
                }
            }
            Entry::Snapshot { vm_path, snapshot, .. } => {
                let snap = self
                    .vms
                    .get(vm_path)
                    .and_then(|vm| vm.snapshots.iter().find(|s| s.id == *snapshot))
                    .ok_or(StatusCode::SNAPSHOT_NOT_FOUND)?;
                match id {
                    PropertyId::SNAPSHOT_DISPLAYNAME => Ok(PropertyValue::String(snap.name.clone())),
                    PropertyId::SNAPSHOT_DESCRIPTION => Ok(PropertyValue::String(snap.description.clone())),
                    PropertyId::SNAPSHOT_POWERSTATE => Ok(PropertyValue::Integer(snap.power_state)),
                    _ => Err(StatusCode::UNRECOGNIZED_PROPERTY),
                }
            }
        }
    }
}

fn guest_session<'a>(vm: &'a mut SimVm, target: &VmTarget) -> std::result::Result<&'a mut SimVm, StatusCode> {
    if !vm.tools_running {
        return Err(StatusCode::TOOLS_NOT_RUNNING);
    }
    if !target.logged_in {
        return Err(StatusCode::GUEST_USER_PERMISSIONS);
    }
    Ok(vm)
}

struct Shared {
    state: Mutex<SimState>,
    latency: Duration,
}

impl Shared {
    // Every `SimState` method leaves the state consistent before it can
    // panic, so a poisoned lock is still usable.
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Work {
    Connect {
        notifier: JobNotifier,
        config: ConnectionConfig,
    },
    Job {
        notifier: JobNotifier,
        target: NativeHandle,
        op: JobOp,
    },
}

fn run_worker(shared: &Shared, mut queue: mpsc::UnboundedReceiver<Work>) {
    while let Some(work) = queue.blocking_recv() {
        if !shared.latency.is_zero() {
            thread::sleep(shared.latency);
        }
        match work {
            Work::Connect { notifier, config } => {
                let outcome = shared.state().connect(&config);
                tracing::debug!(job = %notifier.id(), host = ?config.host_name, ok = outcome.is_ok(), "simulated connect");
                notifier.complete(outcome);
            }
            Work::Job { notifier, target, op } => {
                let operation = op.name();
                let outcome = shared.state().execute(target, op);
                match &outcome {
                    Ok(_) => tracing::debug!(job = %notifier.id(), target = %target, operation, "simulated job succeeded"),
                    Err(code) => {
                        tracing::debug!(job = %notifier.id(), target = %target, operation, code = %code, "simulated job failed");
                    }
                }
                notifier.complete(outcome);
            }
        }
    }
    tracing::debug!("simulated runtime worker stopped");
}

/// Builder for [`SimulatedRuntime`].
#[derive(Debug, Default)]
pub struct SimulatedRuntimeBuilder {
    vms: BTreeMap<String, SimVm>,
    host_accounts: BTreeMap<String, Credentials>,
    sticky_auth_failure: bool,
    latency: Duration,
}

impl SimulatedRuntimeBuilder {
    /// Add a VM to the inventory under `vmx_path`.
    #[must_use]
    pub fn with_vm(mut self, vmx_path: impl Into<String>, vm: SimVm) -> Self {
        self.vms.insert(vmx_path.into(), vm);
        self
    }

    /// Accept connections to `host_name` with exactly `credentials`.
    #[must_use]
    pub fn with_host_account(mut self, host_name: impl Into<String>, credentials: Credentials) -> Self {
        self.host_accounts.insert(host_name.into(), credentials);
        self
    }

    /// Delay every job by `latency` before executing it.
    #[must_use]
    pub fn with_job_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// After one rejected login to a host, reject every later login to that
    /// host even with valid credentials. Some native runtimes behave this
    /// way; enabling it lets callers test their detection of the fault.
    #[must_use]
    pub fn with_sticky_auth_failure(mut self) -> Self {
        self.sticky_auth_failure = true;
        self
    }

    /// Start the runtime's worker thread.
    ///
    /// # Errors
    /// Returns [`VixError::Internal`] if the worker thread cannot be spawned.
    pub fn build(self) -> Result<SimulatedRuntime> {
        let mut state = SimState {
            vms: self.vms,
            host_accounts: self.host_accounts,
            sticky_auth_failure: self.sticky_auth_failure,
            ..SimState::default()
        };
        let mut next_snapshot = 0;
        for vm in state.vms.values_mut() {
            for snapshot in &mut vm.snapshots {
                next_snapshot += 1;
                snapshot.id = next_snapshot;
            }
        }
        state.next_snapshot = next_snapshot;

        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            latency: self.latency,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let worker_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("vix-sim-worker".to_owned())
            .spawn(move || run_worker(&worker_shared, rx))
            .map_err(|e| VixError::internal("start simulated runtime", e.to_string()))?;

        tracing::debug!(vms = shared.state().vms.len(), "simulated runtime started");
        Ok(SimulatedRuntime {
            shared,
            queue: tx,
            next_job: AtomicU64::new(0),
            jobs_issued: AtomicU64::new(0),
        })
    }
}

/// An in-memory management host with a worker thread of its own.
pub struct SimulatedRuntime {
    shared: Arc<Shared>,
    queue: mpsc::UnboundedSender<Work>,
    next_job: AtomicU64,
    jobs_issued: AtomicU64,
}

impl SimulatedRuntime {
    /// Start describing a simulated host.
    #[must_use]
    pub fn builder() -> SimulatedRuntimeBuilder {
        SimulatedRuntimeBuilder::default()
    }

    fn submit(&self, work: impl FnOnce(JobNotifier) -> Work) -> std::result::Result<JobHandle, StatusCode> {
        let id = JobId(self.next_job.fetch_add(1, Ordering::Relaxed) + 1);
        let (notifier, job) = job_channel(id);
        self.queue
            .send(work(notifier))
            .map_err(|_| StatusCode::CANNOT_CONNECT_TO_HOST)?;
        self.jobs_issued.fetch_add(1, Ordering::Relaxed);
        Ok(job)
    }

    /// Handles currently allocated and not yet released.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.shared.state().handles.len()
    }

    /// Successful `release_handle` calls.
    #[must_use]
    pub fn released_handles(&self) -> usize {
        self.shared.state().released
    }

    /// Successful `disconnect` calls.
    #[must_use]
    pub fn disconnects(&self) -> usize {
        self.shared.state().disconnects
    }

    /// Releases or disconnects of handles that were not live.
    #[must_use]
    pub fn stale_releases(&self) -> usize {
        self.shared.state().stale_releases
    }

    /// Jobs accepted by the worker queue, connects included.
    #[must_use]
    pub fn jobs_issued(&self) -> u64 {
        self.jobs_issued.load(Ordering::Relaxed)
    }

    /// Power-state bitmask of a VM, if it exists.
    #[must_use]
    pub fn vm_power_state(&self, vmx_path: &str) -> Option<i32> {
        self.shared.state().vms.get(vmx_path).map(SimVm::power_state)
    }

    /// Whether the VM is registered, if it exists.
    #[must_use]
    pub fn is_registered(&self, vmx_path: &str) -> Option<bool> {
        self.shared.state().vms.get(vmx_path).map(|vm| vm.registered)
    }

    /// Whether a VM file exists at `vmx_path` (deleted VMs do not).
    #[must_use]
    pub fn vm_exists(&self, vmx_path: &str) -> bool {
        self.shared.state().vms.contains_key(vmx_path)
    }

    /// Virtual hardware version of a VM, if it exists.
    #[must_use]
    pub fn hardware_version(&self, vmx_path: &str) -> Option<u32> {
        self.shared.state().vms.get(vmx_path).map(|vm| vm.hardware_version)
    }

    /// Names of a VM's snapshots, oldest first.
    #[must_use]
    pub fn snapshot_names(&self, vmx_path: &str) -> Vec<String> {
        self.shared
            .state()
            .vms
            .get(vmx_path)
            .map(|vm| vm.snapshots.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Contents of a file in a VM's guest file system.
    #[must_use]
    pub fn guest_file(&self, vmx_path: &str, guest_path: &str) -> Option<Vec<u8>> {
        self.shared
            .state()
            .vms
            .get(vmx_path)
            .and_then(|vm| vm.guest_files.get(guest_path).cloned())
    }
}

impl std::fmt::Debug for SimulatedRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedRuntime")
            .field("live_handles", &self.live_handles())
            .field("jobs_issued", &self.jobs_issued())
            .finish_non_exhaustive()
    }
}

impl ManagementRuntime for SimulatedRuntime {
    fn connect(&self, config: &ConnectionConfig) -> std::result::Result<JobHandle, StatusCode> {
        let config = config.clone();
        self.submit(move |notifier| Work::Connect { notifier, config })
    }

    fn disconnect(&self, host: NativeHandle) {
        let mut state = self.shared.state();
        match state.handles.remove(&host) {
            Some(Entry::Host { .. }) => {
                let before = state.handles.len();
                state.handles.retain(|_, entry| entry.host() != Some(host));
                state.disconnects += 1;
                let invalidated = before - state.handles.len();
                drop(state);
                tracing::debug!(host = %host, invalidated, "simulated disconnect");
            }
            Some(entry) => {
                state.handles.insert(host, entry);
                state.stale_releases += 1;
                drop(state);
                tracing::warn!(handle = %host, "disconnect called on a non-host handle");
            }
            None => {
                state.stale_releases += 1;
                drop(state);
                tracing::warn!(handle = %host, "disconnect of a handle that is not live");
            }
        }
    }

    fn issue_job(&self, target: NativeHandle, op: JobOp) -> std::result::Result<JobHandle, StatusCode> {
        self.submit(move |notifier| Work::Job { notifier, target, op })
    }

    fn get_property(&self, handle: NativeHandle, property: PropertyId) -> std::result::Result<PropertyValue, StatusCode> {
        self.shared.state().property(handle, property)
    }

    fn release_handle(&self, handle: NativeHandle) {
        let mut state = self.shared.state();
        if state.handles.remove(&handle).is_some() {
            state.released += 1;
        } else {
            state.stale_releases += 1;
            drop(state);
            tracing::warn!(handle = %handle, "release of a handle that is not live");
        }
    }

    fn root_snapshot_count(&self, vm: NativeHandle) -> std::result::Result<usize, StatusCode> {
        let state = self.shared.state();
        let target = state.vm_target(vm)?;
        state
            .vms
            .get(&target.path)
            .map(|v| v.snapshots.len())
            .ok_or(StatusCode::VM_NOT_FOUND)
    }

    fn root_snapshot(&self, vm: NativeHandle, index: usize) -> std::result::Result<NativeHandle, StatusCode> {
        let mut state = self.shared.state();
        let target = state.vm_target(vm)?;
        let snapshot = state
            .vms
            .get(&target.path)
            .ok_or(StatusCode::VM_NOT_FOUND)?
            .snapshots
            .get(index)
            .map(|s| s.id)
            .ok_or(StatusCode::INVALID_ARG)?;
        Ok(state.allocate(Entry::Snapshot {
            host: target.host,
            vm_path: target.path,
            snapshot,
        }))
    }
}
