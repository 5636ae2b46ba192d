//! Integration test: connecting, host authentication and VM inventory.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use vix_client::sim::{SimVm, SimulatedRuntime, SimulatedRuntimeBuilder};
use vix_client::{
    constant, Connection, ConnectionConfig, Credentials, ErrorKind, PropertyId, PropertyValue, ServiceProvider,
    StatusCode, VixError,
};

const HOST: &str = "esx01.lab";
const RUNNING_VMX: &str = "/vms/running.vmx";
const STOPPED_VMX: &str = "/vms/stopped.vmx";
const SPARE_VMX: &str = "/vms/spare.vmx";

fn builder() -> SimulatedRuntimeBuilder {
    SimulatedRuntime::builder()
        .with_vm(RUNNING_VMX, SimVm::new().powered_on())
        .with_vm(STOPPED_VMX, SimVm::new())
        .with_vm(SPARE_VMX, SimVm::new().unregistered())
        .with_host_account(HOST, Credentials::new("root", "secret"))
}

fn runtime() -> Arc<SimulatedRuntime> {
    Arc::new(builder().build().unwrap_or_else(|e| panic!("simulated runtime failed to start: {e}")))
}

fn connect_local(runtime: &Arc<SimulatedRuntime>) -> Connection {
    Connection::connect(runtime.clone(), &ConnectionConfig::local()).unwrap_or_else(|e| panic!("connect failed: {e}"))
}

fn expect_error<T: std::fmt::Debug>(result: Result<T, VixError>, kind: ErrorKind) -> VixError {
    match result {
        Ok(v) => panic!("expected a {kind}, got {v:?}"),
        Err(e) => {
            assert_eq!(e.kind(), kind, "wrong error class: {e}");
            e
        }
    }
}

fn remote(password: &str) -> ConnectionConfig {
    ConnectionConfig::remote(HOST).with_credentials(Credentials::new("root", password))
}

#[test]
fn connect_with_no_arguments_targets_the_local_host() {
    let runtime = runtime();
    let conn = connect_local(&runtime);

    assert!(!conn.is_closed());
    assert_eq!(conn.host_name(), None);
    assert_eq!(conn.username(), None);
    assert_eq!(
        conn.property(PropertyId::HOST_HOSTTYPE).ok(),
        Some(PropertyValue::Integer(1)),
        "default provider"
    );
    assert_eq!(conn.property(PropertyId::HOST_API_VERSION).ok(), Some(PropertyValue::Integer(1)));
    expect_error(conn.property(PropertyId::VM_POWER_STATE), ErrorKind::Internal);
}

#[test]
fn connecting_publishes_the_constant_table() {
    let runtime = runtime();
    let _conn = connect_local(&runtime);

    assert_eq!(constant("VIX_POWERSTATE_POWERED_OFF"), Some(2));
    assert_eq!(constant("VIX_E_HOST_USER_PERMISSIONS"), Some(3014));
    assert_eq!(constant("VIX_PROPERTY_VM_POWER_STATE"), Some(129));
}

#[test]
fn remote_host_without_credentials_is_refused_locally() {
    let runtime = runtime();
    let err = expect_error(
        Connection::connect(runtime.clone(), &ConnectionConfig::remote("localhost")),
        ErrorKind::Security,
    );
    assert!(err.has_code(StatusCode::HOST_USER_PERMISSIONS), "got {err}");
    assert_eq!(runtime.jobs_issued(), 0, "the host must not be contacted");
}

#[test]
fn bad_credentials_are_a_security_error() {
    let runtime = runtime();
    let err = expect_error(Connection::connect(runtime.clone(), &remote("wrong")), ErrorKind::Security);
    assert!(err.has_code(StatusCode::HOST_USER_PERMISSIONS), "got {err}");
    assert!(!err.is_retryable());
    assert_eq!(runtime.live_handles(), 0);
}

#[test]
fn unknown_host_is_a_retryable_internal_error() {
    let runtime = runtime();
    let config = ConnectionConfig::remote("nowhere.lab").with_credentials(Credentials::new("root", "secret"));
    let err = expect_error(Connection::connect(runtime.clone(), &config), ErrorKind::Internal);
    assert!(err.is_retryable(), "transport failures are retryable: {err}");
}

/// A failed login must not prevent a later login with valid credentials.
#[test]
fn failed_login_does_not_poison_later_logins() {
    let runtime = runtime();
    expect_error(Connection::connect(runtime.clone(), &remote("wrong")), ErrorKind::Security);

    let conn = Connection::connect(runtime.clone(), &remote("secret"))
        .unwrap_or_else(|e| panic!("valid login after a failed one must succeed: {e}"));
    assert_eq!(conn.host_name(), Some(HOST));
    assert_eq!(conn.username(), Some("root"));
}

#[test]
fn sticky_auth_failure_is_detectable() {
    let runtime = Arc::new(
        builder()
            .with_sticky_auth_failure()
            .build()
            .unwrap_or_else(|e| panic!("simulated runtime failed to start: {e}")),
    );
    expect_error(Connection::connect(runtime.clone(), &remote("wrong")), ErrorKind::Security);

    let err = expect_error(Connection::connect(runtime.clone(), &remote("secret")), ErrorKind::Security);
    assert!(err.has_code(StatusCode::HOST_USER_PERMISSIONS), "got {err}");
}

#[test]
fn explicit_close_then_second_close_fails() {
    let runtime = runtime();
    let conn = connect_local(&runtime);

    conn.close().unwrap_or_else(|e| panic!("close failed: {e}"));
    assert!(conn.is_closed());
    expect_error(conn.close(), ErrorKind::ClientProgrammer);
    expect_error(conn.find_running_vm_paths(), ErrorKind::ClientProgrammer);
    assert_eq!(runtime.disconnects(), 1);
    assert_eq!(runtime.live_handles(), 0);
}

#[test]
fn find_running_vms_lists_only_running_registered_vms() {
    let runtime = runtime();
    let conn = connect_local(&runtime);

    let running = conn
        .find_running_vm_paths()
        .unwrap_or_else(|e| panic!("find running VMs failed: {e}"));
    assert_eq!(running, vec![RUNNING_VMX.to_owned()]);

    let vm = conn.open_vm(STOPPED_VMX).unwrap_or_else(|e| panic!("open VM failed: {e}"));
    vm.power_on().unwrap_or_else(|e| panic!("power on failed: {e}"));
    let mut running = conn
        .find_running_vm_paths()
        .unwrap_or_else(|e| panic!("find running VMs failed: {e}"));
    running.sort();
    assert_eq!(running, vec![RUNNING_VMX.to_owned(), STOPPED_VMX.to_owned()]);
}

#[test]
fn register_and_unregister_are_idempotent() {
    let runtime = runtime();
    let conn = connect_local(&runtime);
    assert_eq!(runtime.is_registered(SPARE_VMX), Some(false));

    let err = expect_error(conn.open_vm(SPARE_VMX), ErrorKind::Operation);
    assert!(err.has_code(StatusCode::VM_NOT_FOUND), "got {err}");

    conn.register_vm(SPARE_VMX)
        .unwrap_or_else(|e| panic!("register failed: {e}"));
    conn.register_vm(SPARE_VMX)
        .unwrap_or_else(|e| panic!("second register must succeed: {e}"));
    assert_eq!(runtime.is_registered(SPARE_VMX), Some(true));

    let vm = conn.open_vm(SPARE_VMX).unwrap_or_else(|e| panic!("open VM failed: {e}"));
    vm.close().unwrap_or_else(|e| panic!("close failed: {e}"));

    conn.unregister_vm(SPARE_VMX)
        .unwrap_or_else(|e| panic!("unregister failed: {e}"));
    conn.unregister_vm(SPARE_VMX)
        .unwrap_or_else(|e| panic!("second unregister must succeed: {e}"));
    assert_eq!(runtime.is_registered(SPARE_VMX), Some(false));
}

#[test]
fn registering_a_missing_file_fails() {
    let runtime = runtime();
    let conn = connect_local(&runtime);

    let err = expect_error(conn.register_vm("/vms/missing.vmx"), ErrorKind::Operation);
    assert!(err.has_code(StatusCode::FILE_NOT_FOUND), "got {err}");
    expect_error(conn.open_vm("/vms/missing.vmx"), ErrorKind::Operation);
}

#[test]
fn provider_is_reported_as_host_type() {
    let runtime = runtime();
    let config = ConnectionConfig::local().with_provider(ServiceProvider::Workstation);
    let conn = Connection::connect(runtime.clone(), &config).unwrap_or_else(|e| panic!("connect failed: {e}"));
    assert_eq!(
        conn.property(PropertyId::HOST_HOSTTYPE).ok(),
        Some(PropertyValue::Integer(3))
    );
}

#[test]
fn slow_host_hits_the_job_timeout() {
    let runtime = Arc::new(
        builder()
            .with_job_latency(Duration::from_millis(1500))
            .build()
            .unwrap_or_else(|e| panic!("simulated runtime failed to start: {e}")),
    );
    let config = ConnectionConfig::local().with_job_timeout(Duration::from_secs(1));

    let err = expect_error(Connection::connect(runtime.clone(), &config), ErrorKind::Operation);
    assert!(matches!(err, VixError::JobTimeout { .. }), "got {err}");
    assert!(err.is_retryable());
}

#[test]
fn host_handle_of_a_timed_out_connect_is_disconnected() {
    let runtime = Arc::new(
        builder()
            .with_job_latency(Duration::from_millis(1500))
            .build()
            .unwrap_or_else(|e| panic!("simulated runtime failed to start: {e}")),
    );
    let config = ConnectionConfig::local().with_job_timeout(Duration::from_secs(1));
    expect_error(Connection::connect(runtime.clone(), &config), ErrorKind::Operation);

    let deadline = Instant::now() + Duration::from_secs(10);
    while runtime.disconnects() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(25));
    }
    assert_eq!(runtime.disconnects(), 1, "the late host handle must be disconnected");
    assert_eq!(runtime.live_handles(), 0);
    assert_eq!(runtime.stale_releases(), 0);
}

#[test]
fn connection_is_usable_from_several_threads() {
    let runtime = runtime();
    let conn = connect_local(&runtime);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let running = conn
                    .find_running_vm_paths()
                    .unwrap_or_else(|e| panic!("find running VMs failed: {e}"));
                assert_eq!(running.len(), 1);
            });
        }
    });
}
