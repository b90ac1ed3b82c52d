use serde::Deserialize;
use serde_json::Value as Json;
use stackcheck_core::{Expr, Lookup};

use crate::finding::{Severity, Violation};
use crate::rule::{json_bool, probe_value, property_path, Probe, Rule, RuleContext, RuleError, Targets};

const BLOCK: &str = "PublicAccessBlockConfiguration";
const SETTINGS: [&str; 4] = ["BlockPublicAcls", "BlockPublicPolicy", "IgnorePublicAcls", "RestrictPublicBuckets"];
const PUBLIC_ACLS: [&str; 3] = ["PublicRead", "PublicReadWrite", "AuthenticatedRead"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {}

#[derive(Debug, Default)]
pub struct PublicAccessBlock;

impl PublicAccessBlock {
    pub fn new(_options: Options) -> Self {
        Self
    }
}

impl Rule for PublicAccessBlock {
    fn id(&self) -> &'static str {
        "public-access-block"
    }

    fn description(&self) -> &'static str {
        "buckets must block every form of public access"
    }

    fn default_severity(&self) -> Severity {
        Severity::Critical
    }

    fn targets(&self) -> Targets {
        Targets::Types(&["AWS::S3::Bucket"])
    }

    fn check(&self, cx: &RuleContext<'_>) -> Result<Vec<Violation>, RuleError> {
        let mut out = Vec::new();

        if let Probe::Known(Json::String(acl)) = cx.probe(&["AccessControl"])? {
            if PUBLIC_ACLS.contains(&acl.as_str()) {
                out.push(Violation::new(
                    Severity::Critical,
                    property_path(&["AccessControl"]),
                    format!("canned ACL {acl} grants public access"),
                ));
            }
        }

        if let Some(v) = block_violation(cx)? {
            out.push(v);
            return Ok(out);
        }

        for setting in SETTINGS {
            let path = [BLOCK, setting];
            let violation = match cx.probe(&path)? {
                Probe::Absent => {
                    Some(Violation::new(Severity::Critical, property_path(&path), format!("{setting} is not set")))
                }
                Probe::Known(v) => match json_bool(&v) {
                    Some(true) => None,
                    _ => Some(Violation::new(Severity::Critical, property_path(&path), format!("{setting} is {v}"))),
                },
                Probe::Unknown => Some(Violation::new(
                    Severity::Medium,
                    property_path(&path),
                    format!("{setting} depends on deploy-time values"),
                )),
                Probe::Invalid(why) => {
                    Some(Violation::new(Severity::Medium, property_path(&path), format!("{setting} is invalid: {why}")))
                }
            };
            out.extend(violation);
        }
        Ok(out)
    }
}

/// The block must exist and be a map. Its settings are not resolved here, so
/// a deploy-time value in one setting cannot hide the others.
fn block_violation(cx: &RuleContext<'_>) -> Result<Option<Violation>, RuleError> {
    let missing =
        || Violation::new(Severity::Critical, property_path(&[BLOCK]), "public access block is not configured");
    let unknown = || {
        Violation::new(Severity::Medium, property_path(&[BLOCK]), "public access block depends on deploy-time values")
    };
    let invalid = |why: String| {
        Violation::new(Severity::Medium, property_path(&[BLOCK]), format!("public access block is invalid: {why}"))
    };
    Ok(match cx.lookup(&[BLOCK])? {
        Lookup::Absent => Some(missing()),
        Lookup::Unknown => Some(unknown()),
        Lookup::Invalid(why) => Some(invalid(why)),
        Lookup::Found(block) => match &*block {
            Expr::Map(_) => None,
            other => match probe_value(cx.resolve(other)?) {
                Probe::Absent => Some(missing()),
                Probe::Known(Json::Object(_)) => None,
                Probe::Known(v) => Some(invalid(format!("expected a map, found {v}"))),
                Probe::Unknown => Some(unknown()),
                Probe::Invalid(why) => Some(invalid(why)),
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::check;
    use serde_json::json;

    fn bucket(block: Json) -> Json {
        json!({ "Type": "AWS::S3::Bucket", "Properties": { "PublicAccessBlockConfiguration": block } })
    }

    #[test]
    fn missing_configuration_is_critical() {
        let v = check(&PublicAccessBlock, json!({ "Type": "AWS::S3::Bucket" }));
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].severity, Severity::Critical);
        assert_eq!(v[0].path, "Properties.PublicAccessBlockConfiguration");
    }

    #[test]
    fn fully_blocked_bucket_passes() {
        let v = check(
            &PublicAccessBlock,
            bucket(json!({
                "BlockPublicAcls": true, "BlockPublicPolicy": "true",
                "IgnorePublicAcls": true, "RestrictPublicBuckets": true
            })),
        );
        assert!(v.is_empty());
    }

    #[test]
    fn each_missing_or_false_setting_is_reported() {
        let v = check(&PublicAccessBlock, bucket(json!({ "BlockPublicAcls": true, "BlockPublicPolicy": false })));
        let paths: Vec<_> = v.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(
            paths,
            [
                "Properties.PublicAccessBlockConfiguration.BlockPublicPolicy",
                "Properties.PublicAccessBlockConfiguration.IgnorePublicAcls",
                "Properties.PublicAccessBlockConfiguration.RestrictPublicBuckets",
            ]
        );
        assert!(v.iter().all(|v| v.severity == Severity::Critical));
    }

    #[test]
    fn conditional_block_is_medium() {
        let v = check(
            &PublicAccessBlock,
            bucket(json!({ "Fn::If": ["UseEncryption", { "BlockPublicAcls": true }, { "Ref": "AWS::NoValue" }] })),
        );
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].severity, Severity::Medium);
    }

    #[test]
    fn false_setting_is_reported_next_to_a_deploy_time_one() {
        let v = check(
            &PublicAccessBlock,
            bucket(json!({
                "BlockPublicAcls": false, "BlockPublicPolicy": { "Ref": "Toggle" },
                "IgnorePublicAcls": true, "RestrictPublicBuckets": true
            })),
        );
        let found: Vec<_> = v.iter().map(|v| (v.severity, v.path.as_str())).collect();
        assert_eq!(
            found,
            [
                (Severity::Critical, "Properties.PublicAccessBlockConfiguration.BlockPublicAcls"),
                (Severity::Medium, "Properties.PublicAccessBlockConfiguration.BlockPublicPolicy"),
            ]
        );
    }

    #[test]
    fn block_resolving_to_no_value_is_missing() {
        let v = check(
            &PublicAccessBlock,
            bucket(json!({ "Fn::If": ["IsDev", { "Ref": "AWS::NoValue" }, { "BlockPublicAcls": true }] })),
        );
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].severity, Severity::Critical);
    }

    #[test]
    fn public_canned_acl_is_critical() {
        let v = check(
            &PublicAccessBlock,
            json!({ "Type": "AWS::S3::Bucket", "Properties": { "AccessControl": "PublicRead" } }),
        );
        assert_eq!(v.len(), 2);
        assert_eq!(v[0].path, "Properties.AccessControl");
    }
}
