use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use stackcheck_core::ResolutionContext;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

use crate::engine::{Engine, RuleSet};
use crate::finding::Severity;
use crate::rules;

fn default_fail_on() -> Severity {
    Severity::High
}

fn default_workers() -> usize {
    1
}

fn enabled() -> bool {
    true
}

/// Policy document controlling which rules run and how results are judged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Lowest severity that fails a report.
    #[serde(default = "default_fail_on")]
    pub fail_on: Severity,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Parameter values used in place of template defaults.
    #[serde(default)]
    pub parameters: BTreeMap<String, Json>,
    #[serde(default)]
    pub context: DeployContext,
    #[serde(default)]
    pub rules: BTreeMap<String, RuleConfig>,
}

/// Pseudo parameter values known ahead of deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployContext {
    pub account_id: Option<String>,
    pub region: Option<String>,
    pub partition: Option<String>,
    pub stack_name: Option<String>,
    pub url_suffix: Option<String>,
    pub availability_zones: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Replaces every severity the rule emits.
    #[serde(default)]
    pub severity: Option<Severity>,
    /// Replaces the resource types the rule applies to.
    #[serde(default)]
    pub resource_types: Option<Vec<String>>,
    /// Rule-specific options; validated by the rule itself.
    #[serde(flatten)]
    pub options: Map<String, Json>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self { enabled: true, severity: None, resource_types: None, options: Map::new() }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            fail_on: default_fail_on(),
            workers: default_workers(),
            parameters: BTreeMap::new(),
            context: DeployContext::default(),
            rules: BTreeMap::new(),
        }
    }
}

impl PolicyConfig {
    /// Parses a YAML or JSON policy document and validates it.
    pub fn parse(text: &str) -> Result<Self> {
        let config: PolicyConfig = serde_yaml::from_str(text).context("Failed to parse policy config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read policy config: {}", path.display()))?;
        let config = Self::parse(&text).with_context(|| format!("Invalid policy config: {}", path.display()))?;
        debug!(path = %path.display(), rules = config.rules.len(), "loaded policy config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be greater than 0");
        }
        if self.workers > 64 {
            warn!(workers = self.workers, "workers is very large; most templates have far fewer resources");
        }
        for (id, rule) in &self.rules {
            if !rules::BUILTIN.contains(&id.as_str()) {
                bail!("unknown rule '{id}' (known rules: {})", rules::BUILTIN.join(", "));
            }
            if matches!(&rule.resource_types, Some(types) if types.is_empty()) {
                bail!("rules.{id}.resource_types must not be empty");
            }
        }
        // Build once so option errors surface at load time.
        self.rule_set().map(|_| ())
    }

    /// Sets a parameter value, replacing any configured one.
    pub fn set_parameter(&mut self, name: impl Into<String>, value: Json) {
        self.parameters.insert(name.into(), value);
    }

    /// Enabled rules in built-in order with their configured options.
    pub fn rule_set(&self) -> Result<RuleSet> {
        let mut set = RuleSet::new();
        for id in rules::BUILTIN {
            let config = self.rules.get(id).cloned().unwrap_or_default();
            if !config.enabled {
                debug!(rule = id, "rule disabled");
                continue;
            }
            let rule = rules::build(id, Json::Object(config.options))?;
            let types = config.resource_types.map(|t| t.into_iter().collect::<HashSet<_>>());
            set.register_with(rule, config.severity, types);
        }
        Ok(set)
    }

    pub fn resolution_context(&self) -> ResolutionContext {
        let c = &self.context;
        ResolutionContext {
            parameters: self.parameters.clone(),
            account_id: c.account_id.clone(),
            region: c.region.clone(),
            partition: c.partition.clone(),
            stack_name: c.stack_name.clone(),
            url_suffix: c.url_suffix.clone(),
            availability_zones: c.availability_zones.clone(),
        }
    }

    pub fn engine(&self) -> Result<Engine> {
        Ok(Engine::new(self.rule_set()?).with_context(self.resolution_context()).with_workers(self.workers))
    }
}
