use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use super::error::StoreError;

pub const PROP_ACCESS: &str = "access";
pub const PROP_ENDPOINT: &str = "endpoint";
pub const PROP_ACCESS_KEY: &str = "access_key";
pub const PROP_SECRET_KEY: &str = "secret_key";

/// Whether an adapter may mutate its backing resource.
///
/// Scoped per adapter instance. Both levels always permit loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessLevel {
    ReadOnly,
    ReadWrite,
}

impl AccessLevel {
    pub fn allows_writes(self) -> bool {
        self == AccessLevel::ReadWrite
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::ReadOnly => write!(f, "ro"),
            AccessLevel::ReadWrite => write!(f, "rw"),
        }
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ro" | "read-only" | "readonly" => Ok(AccessLevel::ReadOnly),
            "rw" | "read-write" | "readwrite" => Ok(AccessLevel::ReadWrite),
            other => Err(format!("unknown access level '{}'", other)),
        }
    }
}

/// Connection parameters declared for a map's store (credentials, endpoint, hints).
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreProperties(BTreeMap<String, String>);

impl StoreProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn require(&self, map: &str, name: &str) -> Result<&str, StoreError> {
        self.get(name).ok_or_else(|| StoreError::MissingProperty {
            map: map.to_string(),
            property: name.to_string(),
        })
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some("true") | Some("yes") | Some("1"))
    }

    /// Access level requested by configuration, read-write when undeclared.
    pub fn access(&self, map: &str) -> Result<AccessLevel, StoreError> {
        match self.get(PROP_ACCESS) {
            None => Ok(AccessLevel::ReadWrite),
            Some(raw) => raw.parse().map_err(|_| StoreError::InvalidProperty {
                map: map.to_string(),
                property: PROP_ACCESS.to_string(),
                value: raw.to_string(),
            }),
        }
    }
}

// Secrets must never reach the logs.
impl fmt::Debug for StoreProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in &self.0 {
            if name == PROP_SECRET_KEY {
                map.entry(name, &"<secret>");
            } else {
                map.entry(name, value);
            }
        }
        map.finish()
    }
}

/// Binding and access state shared by every adapter implementation.
///
/// The resource binding is set at most once. Access starts read-only, is granted
/// by a successful `initialize` and is only ever narrowed afterwards.
#[derive(Debug, Default)]
pub struct StoreState {
    resource: OnceLock<String>,
    writable: AtomicBool,
}

impl StoreState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the resource identifier, failing if the state is already bound.
    pub fn bind(&self, map: &str, resource: &str) -> Result<(), StoreError> {
        self.resource
            .set(resource.to_string())
            .map_err(|_| StoreError::AlreadyInitialized {
                map: map.to_string(),
                resource: self.resource_name().to_string(),
            })
    }

    pub fn is_bound(&self) -> bool {
        self.resource.get().is_some()
    }

    pub fn resource_name(&self) -> &str {
        self.resource.get().map(String::as_str).unwrap_or("<unbound>")
    }

    pub fn grant(&self, level: AccessLevel) {
        self.writable.store(level.allows_writes(), Ordering::Release);
    }

    pub fn revoke(&self) {
        self.writable.store(false, Ordering::Release);
    }

    pub fn access(&self) -> AccessLevel {
        if self.writable.load(Ordering::Acquire) {
            AccessLevel::ReadWrite
        } else {
            AccessLevel::ReadOnly
        }
    }

    /// Returns true when a mutation may proceed, logging the dropped call otherwise.
    pub fn permits(&self, op: &str, key: &str) -> bool {
        if self.access().allows_writes() {
            return true;
        }
        tracing::warn!(
            "Readonly permission prevents {}, resource [{}], key [{}], access [{}]",
            op,
            self.resource_name(),
            key,
            self.access()
        );
        false
    }
}

/// Strips a `<namespace>:` prefix from a map name, leaving the resource name.
pub fn resource_name_for(map_name: &str) -> &str {
    match map_name.split_once(':') {
        Some((_, name)) if !name.is_empty() => name,
        _ => map_name,
    }
}
