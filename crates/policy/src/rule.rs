use serde_json::Value as Json;
use stackcheck_core::{Expr, Lookup, ResolveError, ResolvedValue, Resolver, Resource, Template};
use thiserror::Error;

use crate::finding::{Severity, Violation};

#[derive(Error, Debug)]
pub enum RuleError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("{0}")]
    Failed(String),
}

/// Which resources a rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Targets {
    All,
    Types(&'static [&'static str]),
    /// Types the catalog marks taggable, plus anything that carries tags.
    Taggable,
    /// Types with a physical-name property.
    Named,
    Stateful,
}

impl Targets {
    pub fn matches(&self, resource: &Resource) -> bool {
        let info = resource.type_info();
        match self {
            Targets::All => true,
            Targets::Types(types) => types.contains(&resource.resource_type.as_str()),
            Targets::Taggable => info.taggable || resource.properties.contains_key(info.tag_property),
            Targets::Named => info.name_property.is_some(),
            Targets::Stateful => info.stateful,
        }
    }
}

/// A property path after lookup and resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe {
    Absent,
    Known(Json),
    Unknown,
    Invalid(String),
}

/// What a rule sees while checking one resource.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub resource: &'a Resource,
    pub resolver: Resolver<'a>,
}

impl<'a> RuleContext<'a> {
    pub fn new(resource: &'a Resource, resolver: Resolver<'a>) -> Self {
        Self { resource, resolver }
    }

    pub fn template(&self) -> &'a Template {
        self.resolver.template()
    }

    pub fn lookup(&self, path: &[&str]) -> Result<Lookup<'a>, RuleError> {
        Ok(self.resolver.lookup(&self.resource.properties, path)?)
    }

    pub fn resolve(&self, expr: &Expr) -> Result<ResolvedValue, RuleError> {
        Ok(self.resolver.resolve(expr)?)
    }

    /// Looks up `path` under `Properties` and resolves it. A value that
    /// resolves to `AWS::NoValue` counts as absent.
    pub fn probe(&self, path: &[&str]) -> Result<Probe, RuleError> {
        Ok(match self.lookup(path)? {
            Lookup::Absent => Probe::Absent,
            Lookup::Unknown => Probe::Unknown,
            Lookup::Invalid(why) => Probe::Invalid(why),
            Lookup::Found(expr) => probe_value(self.resolve(&expr)?),
        })
    }
}

pub fn probe_value(value: ResolvedValue) -> Probe {
    match value {
        ResolvedValue::Known(Json::Null) => Probe::Absent,
        ResolvedValue::Known(v) => Probe::Known(v),
        ResolvedValue::Unknown => Probe::Unknown,
        ResolvedValue::Invalid(why) => Probe::Invalid(why),
    }
}

/// A named, independent check over one resource at a time.
pub trait Rule: Send + Sync {
    fn id(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Highest severity the rule emits; used for listings.
    fn default_severity(&self) -> Severity;
    fn targets(&self) -> Targets;
    fn check(&self, cx: &RuleContext<'_>) -> Result<Vec<Violation>, RuleError>;
}

/// `Properties.A.B` for reporting.
pub fn property_path(parts: &[&str]) -> String {
    let mut out = String::from("Properties");
    for p in parts {
        out.push('.');
        out.push_str(p);
    }
    out
}

/// Reads a known JSON value as a boolean, accepting `"true"`/`"false"`.
pub fn json_bool(v: &Json) -> Option<bool> {
    ResolvedValue::Known(v.clone()).as_bool()
}

/// Normalizes a string-or-list IAM field to its string members. `None` when a
/// member is not a string.
pub fn string_list(v: &Json) -> Option<Vec<String>> {
    match v {
        Json::String(s) => Some(vec![s.clone()]),
        Json::Array(items) => items.iter().map(|i| i.as_str().map(str::to_string)).collect(),
        _ => None,
    }
}
