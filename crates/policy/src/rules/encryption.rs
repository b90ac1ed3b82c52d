use serde::Deserialize;
use serde_json::Value as Json;
use stackcheck_core::{Expr, Lookup};

use crate::finding::{Severity, Violation};
use crate::rule::{json_bool, property_path, Probe, Rule, RuleContext, RuleError, Targets};

/// How a type declares encryption at rest.
#[derive(Debug, Clone, Copy)]
enum Check {
    /// A boolean switch that must be true.
    Flag(&'static [&'static str]),
    /// A configuration block or key reference that must be present.
    Present(&'static [&'static str]),
    /// Either a key reference, or a managed-encryption switch left on.
    KeyOrFlag(&'static [&'static str], &'static [&'static str]),
}

const REQUIREMENTS: &[(&str, Check)] = &[
    ("AWS::S3::Bucket", Check::Present(&["BucketEncryption", "ServerSideEncryptionConfiguration"])),
    ("AWS::RDS::DBInstance", Check::Flag(&["StorageEncrypted"])),
    ("AWS::RDS::DBCluster", Check::Flag(&["StorageEncrypted"])),
    ("AWS::DynamoDB::Table", Check::Flag(&["SSESpecification", "SSEEnabled"])),
    ("AWS::EFS::FileSystem", Check::Flag(&["Encrypted"])),
    ("AWS::EC2::Volume", Check::Flag(&["Encrypted"])),
    ("AWS::ElastiCache::ReplicationGroup", Check::Flag(&["AtRestEncryptionEnabled"])),
    ("AWS::Kinesis::Stream", Check::Present(&["StreamEncryption"])),
    ("AWS::SQS::Queue", Check::KeyOrFlag(&["KmsMasterKeyId"], &["SqsManagedSseEnabled"])),
    ("AWS::SNS::Topic", Check::Present(&["KmsMasterKeyId"])),
];

const TYPES: &[&str] = &[
    "AWS::S3::Bucket",
    "AWS::RDS::DBInstance",
    "AWS::RDS::DBCluster",
    "AWS::DynamoDB::Table",
    "AWS::EFS::FileSystem",
    "AWS::EC2::Volume",
    "AWS::ElastiCache::ReplicationGroup",
    "AWS::Kinesis::Stream",
    "AWS::SQS::Queue",
    "AWS::SNS::Topic",
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {}

#[derive(Debug, Default)]
pub struct EncryptionAtRest;

impl EncryptionAtRest {
    pub fn new(_options: Options) -> Self {
        Self
    }
}

fn indeterminate(path: &[&str], detail: &str) -> Violation {
    Violation::new(
        Severity::Medium,
        property_path(path),
        format!("encryption setting is indeterminate ({detail}); review manually"),
    )
}

fn flag(cx: &RuleContext<'_>, path: &[&str]) -> Result<Option<Violation>, RuleError> {
    Ok(match cx.probe(path)? {
        Probe::Absent => {
            Some(Violation::new(Severity::High, property_path(path), "encryption at rest is not declared"))
        }
        Probe::Known(v) => match json_bool(&v) {
            Some(true) => None,
            Some(false) => Some(Violation::new(Severity::High, property_path(path), "encryption at rest is disabled")),
            None => Some(Violation::new(Severity::High, property_path(path), format!("expected a boolean, found {v}"))),
        },
        Probe::Unknown => Some(indeterminate(path, "depends on deploy-time values")),
        Probe::Invalid(why) => Some(indeterminate(path, &why)),
    })
}

fn present(cx: &RuleContext<'_>, path: &[&str]) -> Result<Option<Violation>, RuleError> {
    Ok(match cx.lookup(path)? {
        Lookup::Absent => {
            Some(Violation::new(Severity::High, property_path(path), "encryption at rest is not declared"))
        }
        Lookup::Found(expr) => match expr.as_ref() {
            Expr::List(items) if items.is_empty() => {
                Some(Violation::new(Severity::High, property_path(path), "encryption configuration is empty"))
            }
            Expr::Map(m) if m.is_empty() => {
                Some(Violation::new(Severity::High, property_path(path), "encryption configuration is empty"))
            }
            Expr::String(s) if s.trim().is_empty() => {
                Some(Violation::new(Severity::High, property_path(path), "encryption key reference is empty"))
            }
            _ => None,
        },
        Lookup::Unknown => Some(indeterminate(path, "guarded by a condition that is not fixed")),
        Lookup::Invalid(why) => Some(indeterminate(path, &why)),
    })
}

impl Rule for EncryptionAtRest {
    fn id(&self) -> &'static str {
        "encryption-at-rest"
    }

    fn description(&self) -> &'static str {
        "storage and database resources must declare encryption at rest"
    }

    fn default_severity(&self) -> Severity {
        Severity::High
    }

    fn targets(&self) -> Targets {
        Targets::Types(TYPES)
    }

    fn check(&self, cx: &RuleContext<'_>) -> Result<Vec<Violation>, RuleError> {
        let ty = cx.resource.resource_type.as_str();
        let Some((_, check)) = REQUIREMENTS.iter().find(|(t, _)| *t == ty) else {
            return Err(RuleError::Failed(format!("no encryption requirement for {ty}")));
        };
        // Cluster members inherit the cluster's storage encryption.
        if ty == "AWS::RDS::DBInstance" && cx.resource.properties.contains_key("DBClusterIdentifier") {
            return Ok(Vec::new());
        }
        let violation = match *check {
            Check::Flag(path) => flag(cx, path)?,
            Check::Present(path) => present(cx, path)?,
            Check::KeyOrFlag(key, switch) => match present(cx, key)? {
                None => None,
                Some(v) if v.severity == Severity::Medium => Some(v),
                Some(missing) => match cx.probe(switch)? {
                    Probe::Known(Json::Bool(true)) => None,
                    Probe::Known(Json::Bool(false)) => Some(Violation::new(
                        Severity::High,
                        property_path(switch),
                        "managed encryption is disabled and no key is configured",
                    )),
                    Probe::Unknown => Some(indeterminate(switch, "depends on deploy-time values")),
                    _ => Some(missing),
                },
            },
        };
        Ok(violation.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::check;
    use serde_json::json;

    #[test]
    fn bucket_without_encryption_is_high() {
        let v = check(&EncryptionAtRest, json!({ "Type": "AWS::S3::Bucket" }));
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].severity, Severity::High);
        assert_eq!(v[0].path, "Properties.BucketEncryption.ServerSideEncryptionConfiguration");
    }

    #[test]
    fn bucket_with_sse_passes() {
        let v = check(
            &EncryptionAtRest,
            json!({ "Type": "AWS::S3::Bucket", "Properties": { "BucketEncryption": {
                "ServerSideEncryptionConfiguration": [
                    { "ServerSideEncryptionByDefault": {
                        "SSEAlgorithm": "aws:kms", "KMSMasterKeyID": { "Ref": "Key" }
                    } }
                ]
            }}}),
        );
        assert!(v.is_empty());
    }

    #[test]
    fn disabled_database_flag_is_high() {
        let v = check(
            &EncryptionAtRest,
            json!({ "Type": "AWS::RDS::DBCluster", "Properties": { "StorageEncrypted": "false" } }),
        );
        assert_eq!(v[0].message, "encryption at rest is disabled");
    }

    #[test]
    fn unknown_condition_is_indeterminate() {
        let v = check(
            &EncryptionAtRest,
            json!({ "Type": "AWS::RDS::DBInstance", "Properties": {
                "StorageEncrypted": { "Fn::If": ["UseEncryption", true, false] }
            }}),
        );
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].severity, Severity::Medium);
        assert!(v[0].message.contains("indeterminate"));
    }

    #[test]
    fn cluster_members_are_skipped() {
        let v = check(
            &EncryptionAtRest,
            json!({ "Type": "AWS::RDS::DBInstance", "Properties": { "DBClusterIdentifier": "c" } }),
        );
        assert!(v.is_empty());
    }

    #[test]
    fn queues_accept_a_key_or_managed_sse() {
        let queue = |props: Json| check(&EncryptionAtRest, json!({ "Type": "AWS::SQS::Queue", "Properties": props }));
        assert!(queue(json!({ "SqsManagedSseEnabled": true })).is_empty());
        assert!(queue(json!({ "KmsMasterKeyId": "alias/aws/sqs" })).is_empty());
        let v = queue(json!({ "SqsManagedSseEnabled": false }));
        assert_eq!(v[0].path, "Properties.SqsManagedSseEnabled");
        let v = check(&EncryptionAtRest, json!({ "Type": "AWS::SQS::Queue" }));
        assert_eq!(v[0].path, "Properties.KmsMasterKeyId");
    }
}
