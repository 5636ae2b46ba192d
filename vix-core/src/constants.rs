//! Named integer constants and the process-wide constant dictionary.
//!
//! The typed constants below cover the values this crate works with
//! directly. The [`ConstantTable`] is the flat `name → value` namespace the
//! management runtime publishes; it is loaded once per process by
//! [`init_constants`] and is read-only afterwards.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::property::PropertyId;
use crate::status::StatusCode;

/// Waits forever when passed as a timeout.
pub const NO_TIMEOUT: i32 = -1;

/// Bits of the [`PropertyId::VM_POWER_STATE`] bitmask.
pub mod power_state {
    pub const POWERING_OFF: i32 = 0x0001;
    pub const POWERED_OFF: i32 = 0x0002;
    pub const POWERING_ON: i32 = 0x0004;
    pub const POWERED_ON: i32 = 0x0008;
    pub const SUSPENDING: i32 = 0x0010;
    pub const SUSPENDED: i32 = 0x0020;
    pub const TOOLS_RUNNING: i32 = 0x0040;
    pub const RESETTING: i32 = 0x0080;
    pub const BLOCKED_ON_MSG: i32 = 0x0100;
}

/// Values of the [`PropertyId::VM_TOOLS_STATE`] property.
pub mod tools_state {
    pub const UNKNOWN: i32 = 0x0001;
    pub const RUNNING: i32 = 0x0002;
    pub const NOT_INSTALLED: i32 = 0x0004;
}

/// Host flavours a connection can target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ServiceProvider {
    #[default]
    Default,
    Server,
    Workstation,
}

impl ServiceProvider {
    /// The runtime's numeric code for this provider.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            ServiceProvider::Default => 1,
            ServiceProvider::Server => 2,
            ServiceProvider::Workstation => 3,
        }
    }
}

/// Flat, read-only `name → value` dictionary of runtime constants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantTable {
    entries: BTreeMap<String, i64>,
}

impl ConstantTable {
    /// Build a table from arbitrary entries. Later duplicates win.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// The table every conforming runtime publishes: status codes, property
    /// identifiers, power and tools state values, service providers and the
    /// option flags the client passes through.
    #[must_use]
    pub fn builtin() -> Self {
        let mut entries: BTreeMap<String, i64> = BTreeMap::new();
        entries.insert("NO_TIMEOUT".to_owned(), i64::from(NO_TIMEOUT));
        entries.insert("VIX_OK".to_owned(), 0);
        for (name, code) in StatusCode::NAMED {
            if !code.is_ok() {
                entries.insert((*name).to_owned(), i64::try_from(code.value()).unwrap_or(i64::MAX));
            }
        }
        for (name, id) in PropertyId::NAMED {
            entries.insert((*name).to_owned(), i64::from(id.0));
        }

        let power = [
            ("VIX_POWERSTATE_POWERING_OFF", power_state::POWERING_OFF),
            ("VIX_POWERSTATE_POWERED_OFF", power_state::POWERED_OFF),
            ("VIX_POWERSTATE_POWERING_ON", power_state::POWERING_ON),
            ("VIX_POWERSTATE_POWERED_ON", power_state::POWERED_ON),
            ("VIX_POWERSTATE_SUSPENDING", power_state::SUSPENDING),
            ("VIX_POWERSTATE_SUSPENDED", power_state::SUSPENDED),
            ("VIX_POWERSTATE_TOOLS_RUNNING", power_state::TOOLS_RUNNING),
            ("VIX_POWERSTATE_RESETTING", power_state::RESETTING),
            ("VIX_POWERSTATE_BLOCKED_ON_MSG", power_state::BLOCKED_ON_MSG),
            ("VIX_TOOLSSTATE_UNKNOWN", tools_state::UNKNOWN),
            ("VIX_TOOLSSTATE_RUNNING", tools_state::RUNNING),
            ("VIX_TOOLSSTATE_NOT_INSTALLED", tools_state::NOT_INSTALLED),
            ("VIX_VMPOWEROP_NORMAL", 0),
            ("VIX_RUNPROGRAM_RETURN_IMMEDIATELY", 1),
        ];
        for (name, value) in power {
            entries.insert(name.to_owned(), i64::from(value));
        }

        for (name, provider) in [
            ("VIX_SERVICEPROVIDER_DEFAULT", ServiceProvider::Default),
            ("VIX_SERVICEPROVIDER_VMWARE_SERVER", ServiceProvider::Server),
            ("VIX_SERVICEPROVIDER_VMWARE_WORKSTATION", ServiceProvider::Workstation),
        ] {
            entries.insert(name.to_owned(), provider.code());
        }

        Self { entries }
    }

    /// Look up a constant by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<i64> {
        self.entries.get(name).copied()
    }

    /// Number of constants in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table holds no constants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

static CONSTANTS: OnceLock<ConstantTable> = OnceLock::new();

/// Install the process-wide constant table, loading it with `load` on the
/// first call only. Every later call returns the table installed first and
/// never runs its `load`.
pub fn init_constants<F>(load: F) -> &'static ConstantTable
where
    F: FnOnce() -> ConstantTable,
{
    CONSTANTS.get_or_init(load)
}

/// The process-wide constant table, if it has been installed.
#[must_use]
pub fn constants() -> Option<&'static ConstantTable> {
    CONSTANTS.get()
}

/// Look up one constant in the process-wide table.
#[must_use]
pub fn constant(name: &str) -> Option<i64> {
    CONSTANTS.get().and_then(|table| table.get(name))
}
