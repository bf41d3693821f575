//! Per-call resolution state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Identifies one cluster object.
///
/// Also used as the watcher identity in caching mode: the object on whose
/// behalf lookups are watched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectIdentifier {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectIdentifier {
    pub fn new(
        api_version: &str,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let (group, version) = split_api_version(api_version);
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        join_api_version(&self.group, &self.version)
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.api_version(), self.kind)?;
        if !self.namespace.is_empty() {
            write!(f, " {}/{}", self.namespace, self.name)
        } else {
            write!(f, " {}", self.name)
        }
    }
}

/// Splits `group/version` into its parts; `v1` is the core group.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

pub fn join_api_version(group: &str, version: &str) -> String {
    if group.is_empty() {
        version.to_string()
    } else {
        format!("{}/{}", group, version)
    }
}

/// State accumulated while resolving one template.
///
/// A session is created at the start of every resolution call and dropped at
/// its end. Template functions record into it through shared references, so
/// one resolver can serve concurrent calls without sharing this state.
#[derive(Debug, Default)]
pub struct ResolutionSession {
    referenced: Mutex<Vec<ObjectIdentifier>>,
    missing_api_resource: AtomicBool,
    sensitive: AtomicBool,
}

impl ResolutionSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an object the template read or tried to read.
    pub fn record(&self, object: ObjectIdentifier) {
        let mut referenced = self.referenced.lock().unwrap_or_else(|e| e.into_inner());
        if !referenced.contains(&object) {
            tracing::trace!(object = %object, "recording referenced object");
            referenced.push(object);
        }
    }

    pub fn mark_missing_api_resource(&self) {
        self.missing_api_resource.store(true, Ordering::Relaxed);
    }

    pub fn mark_sensitive(&self) {
        self.sensitive.store(true, Ordering::Relaxed);
    }

    pub fn missing_api_resource(&self) -> bool {
        self.missing_api_resource.load(Ordering::Relaxed)
    }

    pub fn has_sensitive_data(&self) -> bool {
        self.sensitive.load(Ordering::Relaxed)
    }

    /// Referenced objects in the order they were first recorded.
    pub fn referenced_objects(&self) -> Vec<ObjectIdentifier> {
        self.referenced
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_api_version() {
        let core = ObjectIdentifier::new("v1", "Secret", "ns", "s");
        assert_eq!(core.group, "");
        assert_eq!(core.api_version(), "v1");

        let grouped = ObjectIdentifier::new("apps/v1", "Deployment", "ns", "d");
        assert_eq!(grouped.group, "apps");
        assert_eq!(grouped.version, "v1");
        assert_eq!(grouped.api_version(), "apps/v1");
    }

    #[test]
    fn test_identifier_display() {
        let namespaced = ObjectIdentifier::new("v1", "ConfigMap", "ns", "cm");
        assert_eq!(namespaced.to_string(), "v1 ConfigMap ns/cm");
        let cluster = ObjectIdentifier::new("v1", "Node", "", "node-a");
        assert_eq!(cluster.to_string(), "v1 Node node-a");
    }

    #[test]
    fn test_session_dedups_references() {
        let session = ResolutionSession::new();
        session.record(ObjectIdentifier::new("v1", "Secret", "ns", "a"));
        session.record(ObjectIdentifier::new("v1", "Secret", "ns", "b"));
        session.record(ObjectIdentifier::new("v1", "Secret", "ns", "a"));
        let names: Vec<_> = session
            .referenced_objects()
            .into_iter()
            .map(|o| o.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_session_flags_start_clear() {
        let session = ResolutionSession::new();
        assert!(!session.missing_api_resource());
        assert!(!session.has_sensitive_data());
        session.mark_missing_api_resource();
        session.mark_sensitive();
        assert!(session.missing_api_resource());
        assert!(session.has_sensitive_data());
    }
}
