use serde::Deserialize;
use serde_json::Value as Json;
use stackcheck_core::{Expr, Lookup, ResolvedValue, Tag, Tags};
use std::borrow::Cow;
use std::collections::BTreeSet;

use crate::finding::{Severity, Violation};
use crate::rule::{property_path, Rule, RuleContext, RuleError, Targets};

fn default_required() -> Vec<String> {
    vec!["Environment".to_string(), "Project".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {
    #[serde(default = "default_required")]
    pub required_tags: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self { required_tags: default_required() }
    }
}

#[derive(Debug)]
pub struct MandatoryTags {
    required: Vec<String>,
}

impl MandatoryTags {
    pub fn new(options: Options) -> Self {
        Self { required: options.required_tags }
    }
}

/// Keys of a resolved tag set, in either list or map form.
fn keys_of(value: &Json) -> Option<BTreeSet<String>> {
    match value {
        Json::Null => Some(BTreeSet::new()),
        Json::Object(m) => Some(m.keys().cloned().collect()),
        Json::Array(items) => items
            .iter()
            .map(|i| i.get("Key").and_then(Json::as_str).map(str::to_string))
            .collect(),
        _ => None,
    }
}

impl Rule for MandatoryTags {
    fn id(&self) -> &'static str {
        "mandatory-tags"
    }

    fn description(&self) -> &'static str {
        "taggable resources must carry the required tag keys"
    }

    fn default_severity(&self) -> Severity {
        Severity::Low
    }

    fn targets(&self) -> Targets {
        Targets::Taggable
    }

    fn check(&self, cx: &RuleContext<'_>) -> Result<Vec<Violation>, RuleError> {
        let path = property_path(&[cx.resource.type_info().tag_property]);
        let keys = match cx.resource.tags() {
            Tags::Absent => Ok(BTreeSet::new()),
            Tags::Entries(entries) => self.entry_keys(cx, &entries)?,
            // A conditional with a known branch is read like a literal tag set.
            Tags::Opaque(expr) => match cx.resolver.peel(expr)? {
                None | Some(Lookup::Absent) => Ok(BTreeSet::new()),
                Some(Lookup::Found(Cow::Borrowed(inner))) => match Tags::parse(inner) {
                    Tags::Entries(entries) => self.entry_keys(cx, &entries)?,
                    _ => resolved_keys(cx, inner)?,
                },
                Some(Lookup::Found(Cow::Owned(inner))) => resolved_keys(cx, &inner)?,
                Some(Lookup::Unknown) => Err("tag set cannot be determined statically".to_string()),
                Some(Lookup::Invalid(why)) => Err(format!("tag set is invalid: {why}")),
            },
        };
        let present = match keys {
            Ok(keys) => keys,
            Err(why) => return Ok(vec![Violation::new(Severity::Medium, path, why)]),
        };

        Ok(self
            .required
            .iter()
            .filter(|r| !present.contains(*r))
            .map(|r| Violation::new(Severity::Low, &path, format!("required tag {r} is missing")))
            .collect())
    }
}

/// Tag keys, or why they cannot be known.
type Keys = Result<BTreeSet<String>, String>;

impl MandatoryTags {
    fn entry_keys(&self, cx: &RuleContext<'_>, entries: &[Tag<'_>]) -> Result<Keys, RuleError> {
        let mut keys = BTreeSet::new();
        let mut computed = false;
        for tag in entries {
            match tag.key {
                Some(k) => {
                    keys.insert(k.to_string());
                }
                None => match cx.resolve(tag.value)?.as_known().and_then(Json::as_str) {
                    Some(k) => {
                        keys.insert(k.to_string());
                    }
                    None => computed = true,
                },
            }
        }
        if computed && self.required.iter().any(|r| !keys.contains(r)) {
            return Ok(Err("tag keys cannot be determined statically".to_string()));
        }
        Ok(Ok(keys))
    }
}

fn resolved_keys(cx: &RuleContext<'_>, expr: &Expr) -> Result<Keys, RuleError> {
    Ok(match cx.resolve(expr)? {
        ResolvedValue::Known(v) => keys_of(&v).ok_or_else(|| format!("tags are not a tag set: {v}")),
        ResolvedValue::Unknown => Err("tag set cannot be determined statically".to_string()),
        ResolvedValue::Invalid(why) => Err(format!("tag set is invalid: {why}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::check;
    use serde_json::json;

    fn rule() -> MandatoryTags {
        MandatoryTags::new(Options::default())
    }

    #[test]
    fn each_missing_key_is_low() {
        let v = check(
            &rule(),
            json!({ "Type": "AWS::S3::Bucket", "Properties": { "Tags": [{ "Key": "Project", "Value": "x" }] } }),
        );
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].severity, Severity::Low);
        assert_eq!(v[0].message, "required tag Environment is missing");

        let v = check(&rule(), json!({ "Type": "AWS::SQS::Queue" }));
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn computed_values_still_count_as_present() {
        let v = check(
            &rule(),
            json!({ "Type": "AWS::S3::Bucket", "Properties": { "Tags": [
                { "Key": "Environment", "Value": { "Ref": "EnvironmentSuffix" } },
                { "Key": "Project", "Value": { "Fn::GetAtt": ["Key", "Arn"] } }
            ]}}),
        );
        assert!(v.is_empty());
    }

    #[test]
    fn file_systems_read_their_own_tag_property() {
        let v = check(
            &rule(),
            json!({ "Type": "AWS::EFS::FileSystem", "Properties": { "FileSystemTags": [
                { "Key": "Environment", "Value": "dev" }, { "Key": "Project", "Value": "p" }
            ]}}),
        );
        assert!(v.is_empty());
    }

    #[test]
    fn conditional_tag_sets_are_resolved_or_medium() {
        let known = json!({ "Type": "AWS::S3::Bucket", "Properties": {
            "Tags": { "Fn::If": ["IsDev", [{ "Key": "Environment", "Value": "dev" }], []] }
        }});
        let v = check(&rule(), known);
        assert_eq!(v.len(), 1);
        assert!(v[0].message.contains("Project"));

        let unknown = json!({ "Type": "AWS::S3::Bucket", "Properties": {
            "Tags": { "Fn::If": ["UseEncryption", [], []] }
        }});
        let v = check(&rule(), unknown);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].severity, Severity::Medium);
    }

    #[test]
    fn known_branch_keeps_literal_keys_despite_deploy_time_values() {
        let v = check(
            &rule(),
            json!({ "Type": "AWS::S3::Bucket", "Properties": {
                "Tags": { "Fn::If": ["IsDev", [{ "Key": "Environment", "Value": { "Ref": "Toggle" } }], []] }
            }}),
        );
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].severity, Severity::Low);
        assert_eq!(v[0].message, "required tag Project is missing");
    }

    #[test]
    fn required_keys_are_configurable() {
        let rule = MandatoryTags::new(Options { required_tags: vec!["Owner".into()] });
        let v = check(&rule, json!({ "Type": "AWS::S3::Bucket" }));
        assert_eq!(v[0].message, "required tag Owner is missing");
    }
}
