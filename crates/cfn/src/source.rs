use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Stack outputs as a flat name to value map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackOutputs(pub BTreeMap<String, String>);

impl StackOutputs {
    /// Accepts a flat JSON object, or the `[{OutputKey, OutputValue}]` list
    /// `describe-stacks` prints. Non-string scalars are stringified.
    pub fn from_json(value: &Json) -> Result<Self, SourceError> {
        let text = |v: &Json| match v {
            Json::String(s) => Some(s.clone()),
            Json::Number(n) => Some(n.to_string()),
            Json::Bool(b) => Some(b.to_string()),
            _ => None,
        };
        let mut out = BTreeMap::new();
        match value {
            Json::Object(m) => {
                for (k, v) in m {
                    let v = text(v).ok_or_else(|| SourceError::Other(format!("output {k} is not a scalar")))?;
                    out.insert(k.clone(), v);
                }
            }
            Json::Array(items) => {
                for item in items {
                    let (Some(k), Some(v)) = (
                        item.get("OutputKey").and_then(Json::as_str),
                        item.get("OutputValue").and_then(text),
                    ) else {
                        return Err(SourceError::Other(format!("malformed output entry {item}")));
                    };
                    out.insert(k.to_string(), v);
                }
            }
            other => return Err(SourceError::Other(format!("outputs must be an object or list, found {other}"))),
        }
        Ok(Self(out))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Observed state of one deployed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub physical_id: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Json>,
}

/// What a source could observe, keyed by logical id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiveResourceSnapshot {
    #[serde(default)]
    pub resources: BTreeMap<String, LiveResource>,
    /// Resources the source knows of but could not describe, with the reason.
    #[serde(default)]
    pub unavailable: BTreeMap<String, String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Worth retrying: throttling, a dropped connection.
    #[error("transient: {0}")]
    Transient(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("{0}")]
    Other(String),
}

/// Reports the live attributes of a deployed stack.
#[async_trait]
pub trait LiveStateSource: Send + Sync {
    async fn describe(&self, outputs: &StackOutputs) -> Result<LiveResourceSnapshot, SourceError>;
}

/// Reads a snapshot previously exported as JSON.
#[derive(Debug, Clone)]
pub struct FileSnapshotSource {
    path: PathBuf,
}

impl FileSnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LiveStateSource for FileSnapshotSource {
    async fn describe(&self, outputs: &StackOutputs) -> Result<LiveResourceSnapshot, SourceError> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            let what = format!("{}: {e}", self.path.display());
            match e.kind() {
                std::io::ErrorKind::PermissionDenied => SourceError::Unauthorized(what),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut => SourceError::Transient(what),
                _ => SourceError::Other(what),
            }
        })?;
        let snapshot: LiveResourceSnapshot = serde_json::from_str(&text)
            .map_err(|e| SourceError::Other(format!("{}: {e}", self.path.display())))?;
        debug!(
            path = %self.path.display(),
            resources = snapshot.resources.len(),
            unavailable = snapshot.unavailable.len(),
            outputs = outputs.0.len(),
            "read live snapshot"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn outputs_accept_both_shapes() {
        let flat = StackOutputs::from_json(&json!({ "BucketName": "logs-dev", "Port": 443 })).unwrap();
        assert_eq!(flat.get("Port"), Some("443"));
        let listed = StackOutputs::from_json(&json!([
            { "OutputKey": "BucketName", "OutputValue": "logs-dev" },
            { "OutputKey": "Port", "OutputValue": "443", "Description": "https" }
        ]))
        .unwrap();
        assert_eq!(flat, listed);
        assert!(StackOutputs::from_json(&json!({ "Nested": { "a": 1 } })).is_err());
        assert!(StackOutputs::from_json(&json!("nope")).is_err());
    }

    #[tokio::test]
    async fn file_source_reads_snapshots() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{}",
            json!({
                "resources": { "Logs": {
                    "type": "AWS::S3::Bucket",
                    "physical_id": "logs-dev",
                    "properties": { "BucketName": "logs-dev" }
                } },
                "unavailable": { "Db": "AccessDenied" }
            })
        )
        .unwrap();
        let snapshot = FileSnapshotSource::new(file.path()).describe(&StackOutputs::default()).await.unwrap();
        assert_eq!(snapshot.resources["Logs"].resource_type, "AWS::S3::Bucket");
        assert_eq!(snapshot.unavailable["Db"], "AccessDenied");
    }

    #[tokio::test]
    async fn missing_or_garbled_files_are_not_transient() {
        let missing = FileSnapshotSource::new("/no/such/snapshot.json");
        assert!(matches!(missing.describe(&StackOutputs::default()).await, Err(SourceError::Other(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let garbled = FileSnapshotSource::new(file.path());
        assert!(matches!(garbled.describe(&StackOutputs::default()).await, Err(SourceError::Other(_))));
    }
}
