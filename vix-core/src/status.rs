use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw status code reported by the management runtime.
///
/// Zero means success; every other value identifies a failure. The numeric
/// values match the runtime's own error table so that codes can be logged
/// and compared against vendor documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u64);

macro_rules! status_codes {
    ($( $(#[$doc:meta])* $name:ident = $value:expr, $text:expr; )*) => {
        impl StatusCode {
            $(
                $(#[$doc])*
                pub const $name: Self = Self($value);
            )*

            /// Every named code with its constant-table name.
            pub const NAMED: &'static [(&'static str, StatusCode)] = &[
                $( (concat!("VIX_E_", stringify!($name)), Self::$name), )*
            ];

            /// Human-readable text for this code, in the runtime's wording.
            #[must_use]
            pub fn text(self) -> &'static str {
                match self {
                    $( Self::$name => $text, )*
                    _ => "Unknown error",
                }
            }
        }
    };
}

status_codes! {
    /// The operation succeeded.
    OK = 0, "The operation was successful";
    FAIL = 1, "Unknown error";
    OUT_OF_MEMORY = 2, "Memory allocation failed: out of memory";
    INVALID_ARG = 3, "One of the parameters was invalid";
    FILE_NOT_FOUND = 4, "A file was not found";
    OBJECT_IS_BUSY = 5, "This function cannot be performed because the handle is executing another function";
    NOT_SUPPORTED = 6, "The operation is not supported";
    FILE_ERROR = 7, "A file access error occurred on the host or guest operating system";
    DISK_FULL = 8, "An error occurred while writing a file; the disk is full";
    INCORRECT_FILE_TYPE = 9, "An error occurred while accessing a file: wrong file type";
    CANCELLED = 10, "The operation was canceled";
    FILE_READ_ONLY = 11, "The file is write-protected";
    FILE_ALREADY_EXISTS = 12, "The file already exists";
    FILE_ACCESS_ERROR = 13, "You do not have access rights to this file";
    REQUIRES_LARGE_FILES = 14, "The file system does not support sufficiently large files";
    FILE_ALREADY_LOCKED = 15, "The file is already in use";
    /// The handle is not valid, or was already released.
    INVALID_HANDLE = 1000, "The handle is not a valid VIX object";
    NOT_SUPPORTED_ON_HANDLE_TYPE = 1001, "The operation is not supported on this type of handle";
    TOO_MANY_HANDLES = 1002, "Too many handles are open";
    NOT_FOUND = 2000, "Invalid file: a required section of the file is missing";
    TYPE_MISMATCH = 2001, "Invalid file: an object has the wrong type";
    INVALID_XML = 2002, "Invalid file: contents are corrupt";
    TIMEOUT_WAITING_FOR_TOOLS = 3000, "A timeout error occurred while waiting for the guest tools";
    UNRECOGNIZED_COMMAND = 3001, "The command is not recognized by the virtual machine";
    OP_NOT_SUPPORTED_ON_GUEST = 3003, "The requested operation is not supported on this guest operating system";
    PROGRAM_NOT_STARTED = 3004, "A program could not run on the guest operating system";
    /// The virtual machine needs to be powered on for this operation.
    VM_NOT_RUNNING = 3006, "The virtual machine needs to be powered on";
    /// The virtual machine must be powered off for this operation.
    VM_IS_RUNNING = 3007, "The virtual machine should not be powered on. It is already running";
    CANNOT_CONNECT_TO_VM = 3008, "Cannot connect to the virtual machine";
    POWEROP_SCRIPTS_NOT_AVAILABLE = 3009, "Cannot execute scripts";
    NO_GUEST_OS_INSTALLED = 3010, "There is no operating system installed in the virtual machine";
    VM_INSUFFICIENT_HOST_MEMORY = 3011, "Not enough physical memory is available to power on this virtual machine";
    SUSPEND_ERROR = 3012, "An error occurred while suspending the virtual machine";
    VM_NOT_ENOUGH_CPUS = 3013, "This virtual machine is configured to run with more CPUs than the host has";
    HOST_USER_PERMISSIONS = 3014, "Insufficient permissions in the host operating system";
    GUEST_USER_PERMISSIONS = 3015, "Authentication failure or insufficient permissions in guest operating system";
    TOOLS_NOT_RUNNING = 3016, "Guest tools are not running in the guest";
    GUEST_OPERATIONS_PROHIBITED = 3017, "Guest operations are not allowed on this virtual machine";
    ANON_GUEST_OPERATIONS_PROHIBITED = 3018, "Guest operations are not allowed for the anonymous user on this virtual machine";
    ROOT_GUEST_OPERATIONS_PROHIBITED = 3019, "Guest operations are not allowed for administrative user on this virtual machine";
    MISSING_ANON_GUEST_ACCOUNT = 3023, "The virtual machine configuration must specify the guest account name to be used for anonymous guest operations";
    CANNOT_AUTHENTICATE_WITH_GUEST = 3024, "The virtual machine cannot authenticate users with guest";
    UNRECOGNIZED_COMMAND_IN_GUEST = 3025, "The command is not recognized by the guest operating system";
    VM_NOT_FOUND = 4000, "The virtual machine cannot be found";
    NOT_SUPPORTED_FOR_VM_VERSION = 4001, "The operation is not supported for this virtual machine version";
    CANNOT_READ_VM_CONFIG = 4002, "Cannot read the virtual machine configuration file";
    TEMPLATE_VM = 4003, "Cannot perform this operation on a template virtual machine";
    VM_ALREADY_LOADED = 4004, "The virtual machine has already been loaded";
    VM_ALREADY_UP_TO_DATE = 4006, "The virtual machine is already up-to-date";
    UNRECOGNIZED_PROPERTY = 6000, "Unrecognized handle property identifier";
    INVALID_PROPERTY_VALUE = 6001, "Invalid property value";
    READ_ONLY_PROPERTY = 6002, "Cannot change a read-only property";
    MISSING_REQUIRED_PROPERTY = 6003, "This handle is missing a required property";
    BAD_VM_INDEX = 8000, "The index parameter does not correspond to a result set";
    SNAPSHOT_NOT_FOUND = 13003, "Unable to find the snapshot";
    CANNOT_CONNECT_TO_HOST = 18000, "Cannot connect to the host";
}

impl StatusCode {
    /// Returns `true` for [`StatusCode::OK`].
    #[must_use]
    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for StatusCode {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
