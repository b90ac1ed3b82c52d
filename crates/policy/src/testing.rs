use serde_json::{json, Value as Json};
use stackcheck_core::{from_value, ResolutionContext, Resolver, Template};

use crate::finding::Violation;
use crate::rule::{Rule, RuleContext};

/// Wraps `resource` as `Subject` in a small template that also declares a
/// `Key`, a defaulted `EnvironmentSuffix`, and an `UseEncryption` condition
/// that stays unknown without parameter overrides.
pub fn template_with(resource: Json) -> Template {
    from_value(&json!({
        "Parameters": {
            "EnvironmentSuffix": { "Type": "String", "Default": "dev" },
            "Toggle": { "Type": "String" }
        },
        "Conditions": {
            "UseEncryption": { "Fn::Equals": [{ "Ref": "Toggle" }, "yes"] },
            "IsDev": { "Fn::Equals": [{ "Ref": "EnvironmentSuffix" }, "dev"] }
        },
        "Resources": {
            "Key": { "Type": "AWS::KMS::Key" },
            "Subject": resource
        }
    }))
    .unwrap()
}

pub fn check(rule: &dyn Rule, resource: Json) -> Vec<Violation> {
    let template = template_with(resource);
    let context = ResolutionContext::default();
    let subject = template.resource("Subject").unwrap();
    rule.check(&RuleContext::new(subject, Resolver::new(&template, &context))).unwrap()
}
