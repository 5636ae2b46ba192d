//! Core types for the VIX host management client.
//!
//! Defines the leaf vocabulary shared by the client crates: runtime status
//! codes, the error taxonomy, handle and node identifiers, property ids and
//! values, and the process-wide constant dictionary.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod constants;
pub mod error;
pub mod id;
pub mod property;
pub mod status;

pub use constants::{constant, constants, init_constants, power_state, tools_state, ConstantTable, ServiceProvider};
pub use error::{classify, ErrorKind, Result, VixError};
pub use id::{JobId, NativeHandle, NodeId};
pub use property::{PropertyId, PropertyType, PropertyValue};
pub use status::StatusCode;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_codes_map_to_security_kind() {
        for code in [
            StatusCode::HOST_USER_PERMISSIONS,
            StatusCode::GUEST_USER_PERMISSIONS,
            StatusCode::GUEST_OPERATIONS_PROHIBITED,
            StatusCode::ANON_GUEST_OPERATIONS_PROHIBITED,
            StatusCode::ROOT_GUEST_OPERATIONS_PROHIBITED,
            StatusCode::MISSING_ANON_GUEST_ACCOUNT,
            StatusCode::CANNOT_AUTHENTICATE_WITH_GUEST,
        ] {
            let err = VixError::from_status("login", code);
            assert_eq!(err.kind(), ErrorKind::Security, "code {code} must be a security error");
            assert!(!err.is_retryable(), "security errors are never retryable");
        }
    }

    #[test]
    fn illegal_state_codes_map_to_operation_kind() {
        let err = VixError::from_status("power off", StatusCode::VM_NOT_RUNNING);
        assert_eq!(err.kind(), ErrorKind::Operation);
        assert_eq!(err.code(), Some(StatusCode::VM_NOT_RUNNING));
        assert!(err.to_string().contains("powered on"), "message must come from the code text: {err}");
    }

    #[test]
    fn undefined_property_maps_to_internal_kind() {
        let err = VixError::from_status("get property", StatusCode::UNRECOGNIZED_PROPERTY);
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.has_code(StatusCode::UNRECOGNIZED_PROPERTY));
    }

    #[test]
    fn client_programmer_error_has_no_code() {
        let err = VixError::not_open("VM");
        assert_eq!(err.kind(), ErrorKind::ClientProgrammer);
        assert_eq!(err.code(), None);
        assert!(!err.is_retryable());
    }

    #[test]
    fn job_timeout_is_an_operation_error() {
        let err = VixError::JobTimeout {
            operation: "wait for tools",
            timeout: std::time::Duration::from_secs(3),
        };
        assert_eq!(err.kind(), ErrorKind::Operation);
        assert!(err.is_retryable());
    }

    #[test]
    fn transport_failure_is_retryable_internal() {
        let err = VixError::from_status("connect", StatusCode::CANNOT_CONNECT_TO_HOST);
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.is_retryable());
    }

    #[test]
    fn error_kind_display_uses_exception_names() {
        assert_eq!(ErrorKind::Operation.to_string(), "VIXException");
        assert_eq!(ErrorKind::ClientProgrammer.to_string(), "VIXClientProgrammerError");
    }

    #[test]
    fn unknown_status_text_is_generic() {
        assert_eq!(StatusCode(987_654).text(), "Unknown error");
    }

    #[test]
    fn builtin_table_contains_power_bits_and_properties() {
        let table = ConstantTable::builtin();
        assert_eq!(table.get("VIX_OK"), Some(0));
        assert_eq!(
            table.get("VIX_POWERSTATE_POWERED_OFF"),
            Some(i64::from(power_state::POWERED_OFF))
        );
        assert_eq!(
            table.get("VIX_PROPERTY_VM_POWER_STATE"),
            Some(i64::from(PropertyId::VM_POWER_STATE.0))
        );
        assert_eq!(table.get("VIX_E_VM_NOT_RUNNING"), Some(3006));
        assert_eq!(table.get("VIX_E_OK"), None, "success is published as VIX_OK only");
        assert_eq!(table.get("NO_TIMEOUT"), Some(-1));
    }

    #[test]
    fn global_table_is_initialised_once() {
        let first = init_constants(ConstantTable::builtin);
        let second = init_constants(|| panic!("loader must not run twice"));
        assert!(std::ptr::eq(first, second), "both calls must return the same table");
        assert_eq!(constant("VIX_POWERSTATE_POWERED_ON"), Some(8));
        assert!(constants().is_some());
    }

    #[test]
    fn property_value_accessors() {
        assert_eq!(PropertyValue::Integer(8).as_i64(), Some(8));
        assert_eq!(PropertyValue::Int64(1 << 40).as_i64(), Some(1 << 40));
        assert_eq!(PropertyValue::String("a.vmx".to_owned()).as_str(), Some("a.vmx"));
        assert_eq!(PropertyValue::Bool(true).as_bool(), Some(true));
        assert_eq!(PropertyValue::Bool(true).as_i64(), None);
        assert_eq!(PropertyValue::Integer(1).property_type(), PropertyType::Integer);
    }

    #[test]
    fn property_id_display_uses_table_name() {
        assert_eq!(PropertyId::VM_POWER_STATE.to_string(), "VIX_PROPERTY_VM_POWER_STATE");
        assert_eq!(PropertyId(9999).to_string(), "property 9999");
    }

    #[test]
    fn service_provider_deserialises_from_snake_case() {
        let provider: ServiceProvider = match serde_json::from_str("\"workstation\"") {
            Ok(p) => p,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(provider, ServiceProvider::Workstation);
    }

    proptest::proptest! {
        #[test]
        fn proptest_every_failure_code_has_exactly_its_classified_kind(raw in 1u64..100_000u64) {
            let code = StatusCode(raw);
            let err = VixError::from_status("op", code);
            proptest::prop_assert_eq!(err.kind(), classify(code));
            proptest::prop_assert_ne!(err.kind(), ErrorKind::ClientProgrammer);
            proptest::prop_assert_eq!(err.code(), Some(code));
        }
    }
}
