//! Handle tree bookkeeping shared by connections, VMs and snapshots.
//!
//! A parent owns its children in a map keyed by [`NodeId`]; a child keeps
//! only a weak back-reference. Closing a node closes its whole subtree
//! before the node's own runtime handle is released, so a parent handle is
//! never released while a descendant still holds one.
//!
//! Lock discipline: a node's lock is never held while calling into the
//! runtime or while locking another node. A cascade that reaches a child
//! already closing on another thread waits on the child's `closed`
//! condition until that close has released the child's handle.

use std::collections::BTreeMap;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use vix_core::{NativeHandle, NodeId, PropertyId, PropertyValue, Result, VixError};

use crate::property;
use crate::runtime::{JobOp, JobResult, ManagementRuntime};
use crate::waiter::{self, JobWaiter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    Connection,
    VirtualMachine,
    Snapshot,
}

impl NodeKind {
    pub(crate) fn label(self) -> &'static str {
        match self {
            NodeKind::Connection => "connection",
            NodeKind::VirtualMachine => "VM",
            NodeKind::Snapshot => "snapshot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Closing,
    Closed,
}

struct NodeState {
    lifecycle: Lifecycle,
    handle: Option<NativeHandle>,
    parent: Option<Weak<Node>>,
    children: BTreeMap<NodeId, Arc<Node>>,
}

pub(crate) struct Node {
    id: NodeId,
    kind: NodeKind,
    opened_at: DateTime<Utc>,
    runtime: Arc<dyn ManagementRuntime>,
    waiter: JobWaiter,
    state: Mutex<NodeState>,
    closed: Condvar,
}

impl Node {
    pub(crate) fn new_root(
        runtime: Arc<dyn ManagementRuntime>,
        waiter: JobWaiter,
        kind: NodeKind,
        handle: NativeHandle,
    ) -> Arc<Self> {
        Arc::new(Self::build(runtime, waiter, kind, handle, None))
    }

    fn build(
        runtime: Arc<dyn ManagementRuntime>,
        waiter: JobWaiter,
        kind: NodeKind,
        handle: NativeHandle,
        parent: Option<Weak<Node>>,
    ) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            opened_at: Utc::now(),
            runtime,
            waiter,
            state: Mutex::new(NodeState {
                lifecycle: Lifecycle::Open,
                handle: Some(handle),
                parent,
                children: BTreeMap::new(),
            }),
            closed: Condvar::new(),
        }
    }

    // Every mutation of `NodeState` completes under a single guard, so a
    // poisoned lock still protects a consistent state.
    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub(crate) fn runtime(&self) -> &dyn ManagementRuntime {
        self.runtime.as_ref()
    }

    /// The live runtime handle, or a client-programmer error once the node
    /// has started closing.
    pub(crate) fn handle(&self) -> Result<NativeHandle> {
        let state = self.state();
        match (state.lifecycle, state.handle) {
            (Lifecycle::Open, Some(handle)) => Ok(handle),
            _ => Err(VixError::not_open(self.kind.label())),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state().lifecycle != Lifecycle::Open
    }

    pub(crate) fn parent(&self) -> Option<Arc<Node>> {
        self.state().parent.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn parent_id(&self) -> Option<NodeId> {
        self.parent().map(|parent| parent.id)
    }

    pub(crate) fn child_count(&self) -> usize {
        self.state().children.len()
    }

    /// Register a freshly obtained runtime handle as a child of this node.
    ///
    /// If this node is no longer open the handle is released immediately and
    /// a client-programmer error is returned.
    pub(crate) fn attach_child(self: &Arc<Self>, kind: NodeKind, handle: NativeHandle) -> Result<Arc<Node>> {
        let child = Arc::new(Self::build(
            Arc::clone(&self.runtime),
            self.waiter,
            kind,
            handle,
            Some(Arc::downgrade(self)),
        ));

        {
            let mut state = self.state();
            if state.lifecycle == Lifecycle::Open {
                state.children.insert(child.id, Arc::clone(&child));
                drop(state);
                tracing::debug!(parent = %self.id, child = %child.id, kind = child.kind.label(), handle = %handle, "attached child");
                return Ok(child);
            }
        }

        tracing::warn!(parent = %self.id, kind = kind.label(), handle = %handle, "parent closed while child was opening");
        child.close_from_parent();
        Err(VixError::not_open(self.kind.label()))
    }

    /// Close this node and its whole subtree, then detach it from its
    /// parent.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if the node is already closed
    /// or closing.
    pub(crate) fn close(&self) -> Result<()> {
        let (children, parent) = {
            let mut state = self.state();
            if state.lifecycle != Lifecycle::Open {
                return Err(VixError::ClientProgrammer(format!(
                    "the {} is already closed",
                    self.kind.label()
                )));
            }
            state.lifecycle = Lifecycle::Closing;
            (mem::take(&mut state.children), state.parent.take())
        };

        self.finish_close(children);

        if let Some(parent) = parent.as_ref().and_then(Weak::upgrade) {
            parent.state().children.remove(&self.id);
        }
        Ok(())
    }

    /// Close initiated by the parent's cascade. The parent has already
    /// taken this node out of its child map, so no detach is needed. A node
    /// that is already closed is skipped silently; one that is closing on
    /// another thread is waited for, so the parent never releases its own
    /// handle ahead of this one.
    fn close_from_parent(&self) {
        let children = {
            let mut state = self.state();
            let lifecycle = state.lifecycle;
            match lifecycle {
                Lifecycle::Open => {}
                Lifecycle::Closing => {
                    drop(
                        self.closed
                            .wait_while(state, |s| s.lifecycle == Lifecycle::Closing)
                            .unwrap_or_else(PoisonError::into_inner),
                    );
                    return;
                }
                Lifecycle::Closed => return,
            }
            state.lifecycle = Lifecycle::Closing;
            state.parent = None;
            mem::take(&mut state.children)
        };
        self.finish_close(children);
    }

    fn finish_close(&self, children: BTreeMap<NodeId, Arc<Node>>) {
        let cascaded = children.len();
        for child in children.into_values() {
            child.close_from_parent();
        }

        let handle = self.state().handle.take();
        if let Some(handle) = handle {
            self.release_native(handle);
        }
        self.state().lifecycle = Lifecycle::Closed;
        self.closed.notify_all();
        tracing::debug!(node = %self.id, kind = self.kind.label(), cascaded, "closed");
    }

    fn release_native(&self, handle: NativeHandle) {
        match self.kind {
            NodeKind::Connection => self.runtime.disconnect(handle),
            NodeKind::VirtualMachine | NodeKind::Snapshot => self.runtime.release_handle(handle),
        }
    }

    /// Issue a job against this node's handle and wait for it.
    pub(crate) fn run_job(&self, op: JobOp) -> Result<JobResult> {
        let handle = self.handle()?;
        waiter::run_job(self.runtime(), self.waiter, handle, op)
    }

    /// Issue a job that creates a child handle. If the wait is abandoned,
    /// a handle the job produces later is released instead of leaking.
    pub(crate) fn run_child_job(&self, op: JobOp) -> Result<JobResult> {
        let handle = self.handle()?;
        let operation = op.name();
        let job = self
            .runtime
            .issue_job(handle, op)
            .map_err(|code| VixError::from_status(operation, code))?;
        let runtime = Arc::clone(&self.runtime);
        self.waiter.wait_for_with_cleanup(job, operation, move |late| {
            if let Some(orphan) = late.handle.filter(|h| h.is_valid()) {
                tracing::debug!(handle = %orphan, operation, "releasing handle of abandoned job");
                runtime.release_handle(orphan);
            }
        })
    }

    pub(crate) fn property(&self, id: PropertyId) -> Result<PropertyValue> {
        property::get_property(self.runtime(), self.handle()?, id)
    }

    pub(crate) fn string_property(&self, id: PropertyId) -> Result<String> {
        property::get_string(self.runtime(), self.handle()?, id)
    }

    pub(crate) fn int_property(&self, id: PropertyId) -> Result<i32> {
        property::get_int(self.runtime(), self.handle()?, id)
    }

    pub(crate) fn bool_property(&self, id: PropertyId) -> Result<bool> {
        property::get_bool(self.runtime(), self.handle()?, id)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let children = mem::take(&mut state.children);
        let handle = state.handle.take();
        state.lifecycle = Lifecycle::Closed;

        for child in children.into_values() {
            child.close_from_parent();
        }
        if let Some(handle) = handle {
            tracing::debug!(node = %self.id, kind = self.kind.label(), handle = %handle, "releasing handle of dropped node");
            self.release_native(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;
    use std::time::Duration;

    use vix_core::{JobId, StatusCode};

    use super::*;
    use crate::config::ConnectionConfig;
    use crate::runtime::{job_channel, JobHandle};

    /// Records release order; fails every job immediately.
    #[derive(Default)]
    struct RecordingRuntime {
        released: Mutex<Vec<(&'static str, NativeHandle)>>,
        next_job: AtomicU64,
        release_delay: Duration,
    }

    impl RecordingRuntime {
        fn with_release_delay(release_delay: Duration) -> Self {
            Self {
                release_delay,
                ..Self::default()
            }
        }

        fn released(&self) -> Vec<(&'static str, NativeHandle)> {
            self.released.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }
    }

    impl ManagementRuntime for RecordingRuntime {
        fn connect(&self, _config: &ConnectionConfig) -> std::result::Result<JobHandle, StatusCode> {
            Err(StatusCode::NOT_SUPPORTED)
        }

        fn disconnect(&self, host: NativeHandle) {
            self.released.lock().unwrap_or_else(PoisonError::into_inner).push(("disconnect", host));
        }

        fn issue_job(&self, _target: NativeHandle, _op: JobOp) -> std::result::Result<JobHandle, StatusCode> {
            let (notifier, job) = job_channel(JobId(self.next_job.fetch_add(1, Ordering::Relaxed)));
            notifier.complete(Err(StatusCode::VM_NOT_RUNNING));
            Ok(job)
        }

        fn get_property(&self, _handle: NativeHandle, _property: PropertyId) -> std::result::Result<PropertyValue, StatusCode> {
            Err(StatusCode::UNRECOGNIZED_PROPERTY)
        }

        fn release_handle(&self, handle: NativeHandle) {
            if !self.release_delay.is_zero() {
                std::thread::sleep(self.release_delay);
            }
            self.released.lock().unwrap_or_else(PoisonError::into_inner).push(("release", handle));
        }

        fn root_snapshot_count(&self, _vm: NativeHandle) -> std::result::Result<usize, StatusCode> {
            Ok(0)
        }

        fn root_snapshot(&self, _vm: NativeHandle, _index: usize) -> std::result::Result<NativeHandle, StatusCode> {
            Err(StatusCode::INVALID_ARG)
        }
    }

    fn tree(runtime: &Arc<RecordingRuntime>) -> (Arc<Node>, Arc<Node>, Arc<Node>) {
        let shared: Arc<dyn ManagementRuntime> = runtime.clone();
        let root = Node::new_root(shared, JobWaiter::new(), NodeKind::Connection, NativeHandle(1));
        let vm = match root.attach_child(NodeKind::VirtualMachine, NativeHandle(2)) {
            Ok(n) => n,
            Err(e) => panic!("unexpected error: {e}"),
        };
        let snapshot = match vm.attach_child(NodeKind::Snapshot, NativeHandle(3)) {
            Ok(n) => n,
            Err(e) => panic!("unexpected error: {e}"),
        };
        (root, vm, snapshot)
    }

    #[test]
    fn cascade_releases_descendants_before_ancestors() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (root, vm, snapshot) = tree(&runtime);

        assert!(root.close().is_ok());

        assert!(vm.is_closed());
        assert!(snapshot.is_closed());
        assert_eq!(
            runtime.released(),
            vec![
                ("release", NativeHandle(3)),
                ("release", NativeHandle(2)),
                ("disconnect", NativeHandle(1)),
            ]
        );
    }

    #[test]
    fn cascade_waits_for_a_child_closing_on_another_thread() {
        let runtime = Arc::new(RecordingRuntime::with_release_delay(Duration::from_millis(150)));
        let (root, vm, snapshot) = tree(&runtime);

        thread::scope(|scope| {
            let vm_close = scope.spawn(|| vm.close());
            thread::sleep(Duration::from_millis(50));
            assert!(root.close().is_ok());
            assert!(matches!(vm_close.join(), Ok(Ok(()))));
        });

        assert!(snapshot.is_closed());
        assert_eq!(
            runtime.released(),
            vec![
                ("release", NativeHandle(3)),
                ("release", NativeHandle(2)),
                ("disconnect", NativeHandle(1)),
            ],
            "the host must be disconnected only after the VM handle is released"
        );
    }

    #[test]
    fn closing_a_child_detaches_it_from_its_parent() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (root, vm, _snapshot) = tree(&runtime);

        assert_eq!(root.child_count(), 1);
        assert!(vm.close().is_ok());
        assert_eq!(root.child_count(), 0);
        assert!(!root.is_closed());
        assert_eq!(vm.parent_id(), None);
    }

    #[test]
    fn second_close_is_a_programmer_error() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (root, _vm, snapshot) = tree(&runtime);

        assert!(snapshot.close().is_ok());
        let err = match snapshot.close() {
            Ok(()) => panic!("second close must fail"),
            Err(e) => e,
        };
        assert!(matches!(err, VixError::ClientProgrammer(_)), "got {err}");
        drop(root);
        let releases_of_3 = runtime.released().iter().filter(|(_, h)| *h == NativeHandle(3)).count();
        assert_eq!(releases_of_3, 1, "snapshot handle must be released exactly once");
    }

    #[test]
    fn closed_node_refuses_handle_access() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (root, vm, _snapshot) = tree(&runtime);

        assert!(root.close().is_ok());
        let err = match vm.run_job(JobOp::PowerOn) {
            Ok(r) => panic!("expected an error, got {r:?}"),
            Err(e) => e,
        };
        assert!(matches!(err, VixError::ClientProgrammer(_)), "got {err}");
        assert!(err.to_string().contains("VM must be open"));
    }

    #[test]
    fn attaching_to_a_closed_parent_releases_the_new_handle() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (root, vm, _snapshot) = tree(&runtime);
        assert!(vm.close().is_ok());

        let attached = vm.attach_child(NodeKind::Snapshot, NativeHandle(9));
        assert!(attached.is_err(), "closed parent must refuse children");
        assert!(runtime.released().contains(&("release", NativeHandle(9))));
        assert!(root.close().is_ok());
    }

    #[test]
    fn dropping_an_unclosed_root_releases_everything_once() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (root, vm, snapshot) = tree(&runtime);
        drop(root);

        assert!(vm.is_closed());
        assert!(snapshot.is_closed());
        drop(vm);
        drop(snapshot);
        assert_eq!(runtime.released().len(), 3);
    }

    #[test]
    fn job_failure_passes_through_classification() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (_root, vm, _snapshot) = tree(&runtime);
        let err = match vm.run_job(JobOp::PowerOff) {
            Ok(r) => panic!("expected an error, got {r:?}"),
            Err(e) => e,
        };
        assert!(err.has_code(StatusCode::VM_NOT_RUNNING));
    }

    #[test]
    fn property_read_failure_is_internal() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (_root, vm, _snapshot) = tree(&runtime);
        let err = match vm.property(PropertyId::VM_POWER_STATE) {
            Ok(v) => panic!("expected an error, got {v:?}"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), vix_core::ErrorKind::Internal);
    }
}
