//! Connection configuration, credentials and snapshot parameters.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vix_core::{Result, ServiceProvider, VixError};

/// A username and password pair for a host or guest account.
///
/// The password is never serialised and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(skip_serializing, default)]
    password: String,
}

impl Credentials {
    /// Create a credential pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The secret half of the pair, for runtimes that must send it.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where and how to connect to a management host.
///
/// A missing `host_name` means the local host. Remote hosts require
/// credentials; the client refuses to contact one without them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ConnectionConfig {
    pub provider: ServiceProvider,
    pub host_name: Option<String>,
    /// Zero selects the runtime's default port.
    pub port: u16,
    pub credentials: Option<Credentials>,
    /// Client-side wait limit for every job issued through the connection.
    pub job_timeout_secs: Option<u64>,
}

impl ConnectionConfig {
    /// Connect to the local host with the default provider.
    #[must_use]
    pub fn local() -> Self {
        Self::default()
    }

    /// Connect to a named host.
    #[must_use]
    pub fn remote(host_name: impl Into<String>) -> Self {
        Self {
            host_name: Some(host_name.into()),
            ..Self::default()
        }
    }

    /// Log in with `credentials`.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Use a non-default port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Target a specific host flavour.
    #[must_use]
    pub fn with_provider(mut self, provider: ServiceProvider) -> Self {
        self.provider = provider;
        self
    }

    /// Bound every job wait on this connection. Sub-second parts are
    /// rounded up to the next whole second.
    #[must_use]
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self.job_timeout_secs = Some(secs);
        self
    }

    /// Returns `true` when a host name is given.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.host_name.is_some()
    }

    /// The configured job wait limit, if any.
    #[must_use]
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    /// Build a configuration from `VIX_*` environment variables.
    ///
    /// Reads `VIX_HOST`, `VIX_PORT`, `VIX_USERNAME`, `VIX_PASSWORD`,
    /// `VIX_PROVIDER` and `VIX_JOB_TIMEOUT_SECS`; unset variables keep
    /// their defaults.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if a variable is malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ConnectionConfig::from_env`] with an arbitrary lookup.
    ///
    /// # Errors
    /// Returns [`VixError::ClientProgrammer`] if a variable is malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            host_name: lookup("VIX_HOST").filter(|h| !h.is_empty()),
            ..Self::default()
        };

        if let Some(port) = lookup("VIX_PORT") {
            config.port = port
                .parse()
                .map_err(|e| VixError::ClientProgrammer(format!("invalid VIX_PORT {port:?}: {e}")))?;
        }

        if let Some(provider) = lookup("VIX_PROVIDER") {
            config.provider = match provider.to_ascii_lowercase().as_str() {
                "default" => ServiceProvider::Default,
                "server" => ServiceProvider::Server,
                "workstation" => ServiceProvider::Workstation,
                other => {
                    return Err(VixError::ClientProgrammer(format!("invalid VIX_PROVIDER {other:?}")));
                }
            };
        }

        config.credentials = match (lookup("VIX_USERNAME"), lookup("VIX_PASSWORD")) {
            (Some(user), password) => Some(Credentials::new(user, password.unwrap_or_default())),
            (None, Some(_)) => {
                return Err(VixError::ClientProgrammer(
                    "VIX_PASSWORD is set without VIX_USERNAME".to_owned(),
                ));
            }
            (None, None) => None,
        };

        if let Some(secs) = lookup("VIX_JOB_TIMEOUT_SECS") {
            let secs = secs
                .parse()
                .map_err(|e| VixError::ClientProgrammer(format!("invalid VIX_JOB_TIMEOUT_SECS {secs:?}: {e}")))?;
            config.job_timeout_secs = Some(secs);
        }

        Ok(config)
    }
}

/// Name and description of a snapshot to create. Both are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct SnapshotSpec {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl SnapshotSpec {
    /// A snapshot with no name and no description.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot with a name and no description.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            description: None,
        }
    }

    /// Attach a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use vix_core::ErrorKind;

    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn debug_redacts_password() {
        let creds = Credentials::new("admin", "hunter2");
        let printed = format!("{creds:?}");
        assert!(printed.contains("admin"));
        assert!(!printed.contains("hunter2"), "password leaked: {printed}");
    }

    #[test]
    fn password_is_never_serialised() {
        let config = ConnectionConfig::remote("esx01").with_credentials(Credentials::new("root", "s3cret"));
        let json = match serde_json::to_string(&config) {
            Ok(j) => j,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert!(json.contains("root"));
        assert!(!json.contains("s3cret"), "password leaked: {json}");
    }

    #[test]
    fn empty_environment_yields_local_defaults() {
        let config = match ConnectionConfig::from_lookup(lookup_from(&[])) {
            Ok(c) => c,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(config, ConnectionConfig::local());
        assert!(!config.is_remote());
        assert_eq!(config.job_timeout(), None);
    }

    #[test]
    fn environment_populates_every_field() {
        let config = match ConnectionConfig::from_lookup(lookup_from(&[
            ("VIX_HOST", "esx01.lab"),
            ("VIX_PORT", "902"),
            ("VIX_USERNAME", "root"),
            ("VIX_PASSWORD", "pw"),
            ("VIX_PROVIDER", "Server"),
            ("VIX_JOB_TIMEOUT_SECS", "30"),
        ])) {
            Ok(c) => c,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(config.host_name.as_deref(), Some("esx01.lab"));
        assert_eq!(config.port, 902);
        assert_eq!(config.provider, ServiceProvider::Server);
        assert_eq!(config.job_timeout(), Some(Duration::from_secs(30)));
        let creds = config.credentials.as_ref().map(|c| (c.username.as_str(), c.password()));
        assert_eq!(creds, Some(("root", "pw")));
    }

    #[test]
    fn malformed_port_is_rejected() {
        let err = match ConnectionConfig::from_lookup(lookup_from(&[("VIX_PORT", "ninety")])) {
            Ok(c) => panic!("expected an error, got {c:?}"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), ErrorKind::ClientProgrammer);
        assert!(err.to_string().contains("VIX_PORT"));
    }

    #[test]
    fn password_without_username_is_rejected() {
        let result = ConnectionConfig::from_lookup(lookup_from(&[("VIX_PASSWORD", "pw")]));
        assert!(result.is_err(), "a lone password must be rejected");
    }

    #[test]
    fn job_timeout_rounds_up_to_whole_seconds() {
        let config = ConnectionConfig::local().with_job_timeout(Duration::from_millis(1500));
        assert_eq!(config.job_timeout_secs, Some(2));
    }

    #[test]
    fn snapshot_spec_builders() {
        let spec = SnapshotSpec::named("base").with_description("clean install");
        assert_eq!(spec.name.as_deref(), Some("base"));
        assert_eq!(spec.description.as_deref(), Some("clean install"));
        assert_eq!(SnapshotSpec::new(), SnapshotSpec::default());
    }
}
