//! Property identifiers and typed property values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a property readable from a runtime handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub u32);

impl PropertyId {
    pub const NONE: Self = Self(0);

    // Host handle properties.
    pub const HOST_HOSTTYPE: Self = Self(50);
    pub const HOST_API_VERSION: Self = Self(51);

    // VM handle properties.
    pub const VM_NUM_VCPUS: Self = Self(101);
    pub const VM_VMX_PATHNAME: Self = Self(103);
    pub const VM_VMTEAM_PATHNAME: Self = Self(105);
    pub const VM_MEMORY_SIZE: Self = Self(106);
    pub const VM_IN_VMTEAM: Self = Self(128);
    /// Bitmask of `VIX_POWERSTATE_*` flags.
    pub const VM_POWER_STATE: Self = Self(129);
    /// One of the `VIX_TOOLSSTATE_*` values.
    pub const VM_TOOLS_STATE: Self = Self(152);
    pub const VM_IS_RUNNING: Self = Self(196);

    // Snapshot handle properties.
    pub const SNAPSHOT_DISPLAYNAME: Self = Self(4200);
    pub const SNAPSHOT_DESCRIPTION: Self = Self(4201);
    pub const SNAPSHOT_POWERSTATE: Self = Self(4205);

    /// Every client-visible property with its constant-table name.
    pub const NAMED: &'static [(&'static str, PropertyId)] = &[
        ("VIX_PROPERTY_NONE", Self::NONE),
        ("VIX_PROPERTY_HOST_HOSTTYPE", Self::HOST_HOSTTYPE),
        ("VIX_PROPERTY_HOST_API_VERSION", Self::HOST_API_VERSION),
        ("VIX_PROPERTY_VM_NUM_VCPUS", Self::VM_NUM_VCPUS),
        ("VIX_PROPERTY_VM_VMX_PATHNAME", Self::VM_VMX_PATHNAME),
        ("VIX_PROPERTY_VM_VMTEAM_PATHNAME", Self::VM_VMTEAM_PATHNAME),
        ("VIX_PROPERTY_VM_MEMORY_SIZE", Self::VM_MEMORY_SIZE),
        ("VIX_PROPERTY_VM_IN_VMTEAM", Self::VM_IN_VMTEAM),
        ("VIX_PROPERTY_VM_POWER_STATE", Self::VM_POWER_STATE),
        ("VIX_PROPERTY_VM_TOOLS_STATE", Self::VM_TOOLS_STATE),
        ("VIX_PROPERTY_VM_IS_RUNNING", Self::VM_IS_RUNNING),
        ("VIX_PROPERTY_SNAPSHOT_DISPLAYNAME", Self::SNAPSHOT_DISPLAYNAME),
        ("VIX_PROPERTY_SNAPSHOT_DESCRIPTION", Self::SNAPSHOT_DESCRIPTION),
        ("VIX_PROPERTY_SNAPSHOT_POWERSTATE", Self::SNAPSHOT_POWERSTATE),
    ];
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::NAMED.iter().find(|(_, id)| id == self) {
            Some((name, _)) => write!(f, "{name}"),
            None => write!(f, "property {}", self.0),
        }
    }
}

/// Storage type of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum PropertyType {
    String,
    Integer,
    Int64,
    Bool,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyType::String => write!(f, "string"),
            PropertyType::Integer => write!(f, "integer"),
            PropertyType::Int64 => write!(f, "int64"),
            PropertyType::Bool => write!(f, "bool"),
        }
    }
}

/// A property value as returned by the runtime.
///
/// Bitmask properties such as [`PropertyId::VM_POWER_STATE`] arrive as
/// [`PropertyValue::Integer`]; their bits are not interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum PropertyValue {
    String(String),
    Integer(i32),
    Int64(i64),
    Bool(bool),
}

impl PropertyValue {
    /// The storage type of this value.
    #[must_use]
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::String(_) => PropertyType::String,
            PropertyValue::Integer(_) => PropertyType::Integer,
            PropertyValue::Int64(_) => PropertyType::Int64,
            PropertyValue::Bool(_) => PropertyType::Bool,
        }
    }

    /// Borrow the string value, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Widen an integer value to `i64`. Booleans and strings yield `None`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(i64::from(*i)),
            PropertyValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// The boolean value, if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => write!(f, "{s}"),
            PropertyValue::Integer(i) => write!(f, "{i}"),
            PropertyValue::Int64(i) => write!(f, "{i}"),
            PropertyValue::Bool(b) => write!(f, "{b}"),
        }
    }
}
