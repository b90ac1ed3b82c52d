use serde::Deserialize;
use serde_json::Value as Json;
use stackcheck_core::{DeletionPolicy, Tags};

use crate::finding::{Severity, Violation};
use crate::rule::{Rule, RuleContext, RuleError, Targets};

fn default_environment_tag() -> String {
    "Environment".to_string()
}

fn default_ephemeral_environments() -> Vec<String> {
    ["dev", "test", "ephemeral"].into_iter().map(String::from).collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {
    /// Treat every resource as belonging to a throwaway environment.
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default = "default_environment_tag")]
    pub environment_tag: String,
    #[serde(default = "default_ephemeral_environments")]
    pub ephemeral_environments: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ephemeral: false,
            environment_tag: default_environment_tag(),
            ephemeral_environments: default_ephemeral_environments(),
        }
    }
}

#[derive(Debug)]
pub struct DeletionSafety {
    options: Options,
}

impl DeletionSafety {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    /// Ephemeral when configured so, or when the environment tag resolves to
    /// one of the configured names. An environment that cannot be determined
    /// is treated as persistent.
    fn is_ephemeral(&self, cx: &RuleContext<'_>) -> Result<bool, RuleError> {
        if self.options.ephemeral {
            return Ok(true);
        }
        let Tags::Entries(tags) = cx.resource.tags() else { return Ok(false) };
        let Some(tag) = tags.iter().find(|t| t.key == Some(self.options.environment_tag.as_str())) else {
            return Ok(false);
        };
        Ok(match cx.resolve(tag.value)?.as_known() {
            Some(Json::String(env)) => self.options.ephemeral_environments.iter().any(|e| e.eq_ignore_ascii_case(env)),
            _ => false,
        })
    }
}

impl Rule for DeletionSafety {
    fn id(&self) -> &'static str {
        "deletion-safety"
    }

    fn description(&self) -> &'static str {
        "stateful resources must be retained in persistent environments and disposable in ephemeral ones"
    }

    fn default_severity(&self) -> Severity {
        Severity::Critical
    }

    fn targets(&self) -> Targets {
        Targets::All
    }

    fn check(&self, cx: &RuleContext<'_>) -> Result<Vec<Violation>, RuleError> {
        let resource = cx.resource;
        let mut out = Vec::new();
        if self.is_ephemeral(cx)? {
            if let Some(p) = resource.deletion_policy.filter(DeletionPolicy::retains) {
                out.push(Violation::new(
                    Severity::Critical,
                    "DeletionPolicy",
                    format!("{p} leaves the resource behind when an ephemeral stack is torn down"),
                ));
            }
            if let Some(p) = resource.update_replace_policy.filter(DeletionPolicy::retains) {
                out.push(Violation::new(
                    Severity::Critical,
                    "UpdateReplacePolicy",
                    format!("{p} orphans replaced resources in an ephemeral stack"),
                ));
            }
            return Ok(out);
        }

        if !resource.type_info().stateful {
            return Ok(out);
        }
        match resource.deletion_policy {
            None => out.push(Violation::new(
                Severity::High,
                "DeletionPolicy",
                "stateful resource has no DeletionPolicy and is deleted with the stack",
            )),
            Some(DeletionPolicy::Delete) => out.push(Violation::new(
                Severity::High,
                "DeletionPolicy",
                "stateful resource is deleted with the stack",
            )),
            Some(_) => {}
        }
        Ok(out)
    }
}
