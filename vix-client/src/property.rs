//! Typed property reads against runtime handles.
//!
//! Property reads never fail with an operation error: an undefined
//! property or a stale handle is a [`VixError::Internal`].

use vix_core::{NativeHandle, PropertyId, PropertyValue, Result, StatusCode, VixError};

use crate::runtime::ManagementRuntime;

const OPERATION: &str = "get property";

/// Read one property of `handle`.
///
/// # Errors
/// Returns [`VixError::Internal`] carrying the runtime's code if the
/// property is not defined for the handle or the handle is invalid.
pub fn get_property(runtime: &dyn ManagementRuntime, handle: NativeHandle, property: PropertyId) -> Result<PropertyValue> {
    runtime.get_property(handle, property).map_err(|code| {
        tracing::debug!(handle = %handle, property = %property, code = %code, "property read failed");
        VixError::Internal {
            operation: OPERATION,
            code: Some(code),
            message: format!("{property}: {}", code.text()),
        }
    })
}

/// Read a string property.
///
/// # Errors
/// As [`get_property`], plus a `TYPE_MISMATCH` internal error if the value
/// is not a string.
pub fn get_string(runtime: &dyn ManagementRuntime, handle: NativeHandle, property: PropertyId) -> Result<String> {
    match get_property(runtime, handle, property)? {
        PropertyValue::String(s) => Ok(s),
        other => Err(type_mismatch(property, &other, "string")),
    }
}

/// Read a 32-bit integer property, including bitmask properties.
///
/// # Errors
/// As [`get_property`], plus a `TYPE_MISMATCH` internal error if the value
/// is not a 32-bit integer.
pub fn get_int(runtime: &dyn ManagementRuntime, handle: NativeHandle, property: PropertyId) -> Result<i32> {
    match get_property(runtime, handle, property)? {
        PropertyValue::Integer(i) => Ok(i),
        other => Err(type_mismatch(property, &other, "integer")),
    }
}

/// Read a boolean property.
///
/// # Errors
/// As [`get_property`], plus a `TYPE_MISMATCH` internal error if the value
/// is not a boolean.
pub fn get_bool(runtime: &dyn ManagementRuntime, handle: NativeHandle, property: PropertyId) -> Result<bool> {
    match get_property(runtime, handle, property)? {
        PropertyValue::Bool(b) => Ok(b),
        other => Err(type_mismatch(property, &other, "bool")),
    }
}

fn type_mismatch(property: PropertyId, value: &PropertyValue, expected: &str) -> VixError {
    VixError::Internal {
        operation: OPERATION,
        code: Some(StatusCode::TYPE_MISMATCH),
        message: format!("{property} is a {}, not a {expected}", value.property_type()),
    }
}
