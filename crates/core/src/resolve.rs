use base64::Engine as _;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::error::ResolveError;
use crate::expr::{Expr, PseudoParameter, SubPart};
use crate::template::{Parameter, Template};

/// The static value of an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum ResolvedValue {
    Known(Json),
    /// Depends on deploy-time state.
    Unknown,
    /// Can never evaluate (bad index, disallowed parameter value, type clash).
    Invalid(String),
}

impl ResolvedValue {
    pub fn is_unknown(&self) -> bool {
        matches!(self, ResolvedValue::Unknown)
    }

    pub fn as_known(&self) -> Option<&Json> {
        match self {
            ResolvedValue::Known(v) => Some(v),
            _ => None,
        }
    }

    /// Known booleans, also accepting the `"true"`/`"false"` strings templates
    /// commonly use.
    pub fn as_bool(&self) -> Option<bool> {
        match self.as_known()? {
            Json::Bool(b) => Some(*b),
            Json::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Json::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }
}

/// Deploy-time facts the caller already knows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolutionContext {
    pub parameters: BTreeMap<String, Json>,
    pub account_id: Option<String>,
    pub region: Option<String>,
    pub partition: Option<String>,
    pub stack_name: Option<String>,
    pub url_suffix: Option<String>,
    pub availability_zones: Option<Vec<String>>,
}

/// Result of navigating a property path without resolving the leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<'t> {
    Found(Cow<'t, Expr>),
    Absent,
    Unknown,
    Invalid(String),
}

pub fn resolve(expr: &Expr, template: &Template, context: &ResolutionContext) -> Result<ResolvedValue, ResolveError> {
    Resolver::new(template, context).resolve(expr)
}

#[derive(Debug, Clone, Copy)]
pub struct Resolver<'t> {
    template: &'t Template,
    context: &'t ResolutionContext,
}

use ResolvedValue::{Invalid, Known, Unknown};

impl<'t> Resolver<'t> {
    pub fn new(template: &'t Template, context: &'t ResolutionContext) -> Self {
        Self { template, context }
    }

    pub fn template(&self) -> &'t Template {
        self.template
    }

    pub fn resolve(&self, expr: &Expr) -> Result<ResolvedValue, ResolveError> {
        self.eval(expr, &mut Vec::new())
    }

    /// Evaluates a named entry of the `Conditions` section.
    pub fn condition(&self, name: &str) -> Result<ResolvedValue, ResolveError> {
        self.named_condition(name, &mut Vec::new())
    }

    /// Strips `Fn::If` wrappers whose condition is known. `None` means the
    /// expression evaluates to `AWS::NoValue`.
    pub fn peel<'e>(&self, expr: &'e Expr) -> Result<Option<Lookup<'e>>, ResolveError> {
        let mut current = expr;
        loop {
            match current {
                Expr::Pseudo(PseudoParameter::NoValue) => return Ok(None),
                Expr::If { condition, then, otherwise } => match self.condition(condition)? {
                    Known(Json::Bool(true)) => current = &**then,
                    Known(Json::Bool(false)) => current = &**otherwise,
                    Known(other) => return Ok(Some(Lookup::Invalid(format!("condition {condition} is {other}")))),
                    Unknown => return Ok(Some(Lookup::Unknown)),
                    Invalid(why) => return Ok(Some(Lookup::Invalid(why))),
                },
                other => return Ok(Some(Lookup::Found(Cow::Borrowed(other)))),
            }
        }
    }

    /// Follows `path` through nested maps, peeling conditionals at every step.
    /// A computed intermediate value that resolves to a known object is walked
    /// as a literal.
    pub fn lookup<'e>(
        &self,
        properties: &'e BTreeMap<String, Expr>,
        path: &[&str],
    ) -> Result<Lookup<'e>, ResolveError> {
        let Some((first, rest)) = path.split_first() else { return Ok(Lookup::Absent) };
        let Some(mut current) = properties.get(*first).map(Cow::Borrowed) else { return Ok(Lookup::Absent) };
        let mut remaining = rest;
        loop {
            current = match current {
                Cow::Borrowed(e) => match self.peel(e)? {
                    None => return Ok(Lookup::Absent),
                    Some(Lookup::Found(c)) => c,
                    Some(other) => return Ok(other),
                },
                Cow::Owned(e) => Cow::Owned(e),
            };
            let Some((key, rest)) = remaining.split_first() else { return Ok(Lookup::Found(current)) };
            remaining = rest;
            current = match current {
                Cow::Borrowed(Expr::Map(m)) => match m.get(*key) {
                    Some(e) => Cow::Borrowed(e),
                    None => return Ok(Lookup::Absent),
                },
                Cow::Owned(Expr::Map(mut m)) => match m.remove(*key) {
                    Some(e) => Cow::Owned(e),
                    None => return Ok(Lookup::Absent),
                },
                other if other.is_literal() => {
                    return Ok(Lookup::Invalid(format!("expected a map at '{key}', found {other}")))
                }
                other => match self.resolve(&other)? {
                    Known(Json::Object(m)) => match m.get(*key) {
                        Some(v) => Cow::Owned(Expr::literal(v)),
                        None => return Ok(Lookup::Absent),
                    },
                    Known(v) => return Ok(Lookup::Invalid(format!("expected a map at '{key}', found {v}"))),
                    Unknown => return Ok(Lookup::Unknown),
                    Invalid(why) => return Ok(Lookup::Invalid(why)),
                },
            };
        }
    }

    fn eval(&self, expr: &Expr, visiting: &mut Vec<String>) -> Result<ResolvedValue, ResolveError> {
        Ok(match expr {
            Expr::Null => Known(Json::Null),
            Expr::Bool(b) => Known(Json::Bool(*b)),
            Expr::Number(n) => Known(Json::Number(n.clone())),
            Expr::String(s) => Known(Json::String(s.clone())),
            Expr::List(items) => match self.all(items.iter(), visiting)? {
                Ok(values) => Known(Json::Array(values)),
                Err(state) => state,
            },
            Expr::Map(map) => match self.all(map.values(), visiting)? {
                Ok(values) => Known(Json::Object(map.keys().cloned().zip(values).collect())),
                Err(state) => state,
            },
            Expr::Ref(name) => {
                if let Some(p) = self.template.parameter(name) {
                    self.parameter(p)
                } else if self.template.resource(name).is_some() {
                    Unknown
                } else {
                    return Err(unresolved(name));
                }
            }
            Expr::Pseudo(p) => self.pseudo(*p),
            Expr::GetAtt { resource, .. } => {
                if self.template.resource(resource).is_none() {
                    return Err(unresolved(resource));
                }
                Unknown
            }
            Expr::Sub(parts) => self.substitute(parts, visiting)?,
            Expr::If { condition, then, otherwise } => match self.named_condition(condition, visiting)? {
                Known(Json::Bool(true)) => self.eval(then, visiting)?,
                Known(Json::Bool(false)) => self.eval(otherwise, visiting)?,
                Known(other) => Invalid(format!("condition {condition} evaluated to {other}")),
                state => state,
            },
            Expr::Select { index, list } => {
                let index = self.eval(index, visiting)?;
                let list = self.eval(list, visiting)?;
                match (index, list) {
                    (Invalid(why), _) | (_, Invalid(why)) => Invalid(why),
                    (Unknown, _) | (_, Unknown) => Unknown,
                    (Known(i), Known(Json::Array(items))) => match as_index(&i) {
                        Some(i) if i < items.len() => Known(items[i].clone()),
                        Some(i) => Invalid(format!("index {i} out of range for {} items", items.len())),
                        None => Invalid(format!("select index {i} is not a number")),
                    },
                    (_, Known(other)) => Invalid(format!("cannot select from {other}")),
                }
            }
            Expr::Join { delimiter, items } => match self.eval(items, visiting)? {
                Known(Json::Array(values)) => {
                    match values.iter().map(scalar_text).collect::<Option<Vec<_>>>() {
                        Some(parts) => Known(Json::String(parts.join(delimiter.as_str()))),
                        None => Invalid("join items must be scalars".to_string()),
                    }
                }
                Known(other) => Invalid(format!("cannot join {other}")),
                state => state,
            },
            Expr::Split { delimiter, source } => match self.eval(source, visiting)? {
                Known(Json::String(s)) => {
                    Known(Json::Array(s.split(delimiter.as_str()).map(|p| Json::String(p.to_string())).collect()))
                }
                Known(other) => Invalid(format!("cannot split {other}")),
                state => state,
            },
            Expr::FindInMap { map, top, second } => {
                let table = self.template.mappings.get(map).ok_or_else(|| unresolved(map))?;
                let top = self.eval(top, visiting)?;
                let second = self.eval(second, visiting)?;
                match (top, second) {
                    (Invalid(why), _) | (_, Invalid(why)) => Invalid(why),
                    (Unknown, _) | (_, Unknown) => Unknown,
                    (Known(a), Known(b)) => match (scalar_text(&a), scalar_text(&b)) {
                        (Some(a), Some(b)) => match table.get(&a).and_then(|row| row.get(&b)) {
                            Some(v) => Known(v.clone()),
                            None => Invalid(format!("mapping {map} has no entry {a}/{b}")),
                        },
                        _ => Invalid("mapping keys must be scalars".to_string()),
                    },
                }
            }
            Expr::Base64(inner) => match self.eval(inner, visiting)? {
                Known(Json::String(s)) => {
                    Known(Json::String(base64::engine::general_purpose::STANDARD.encode(s.as_bytes())))
                }
                Known(other) => Invalid(format!("cannot base64-encode {other}")),
                state => state,
            },
            Expr::ImportValue(inner) => match self.eval(inner, visiting)? {
                Invalid(why) => Invalid(why),
                _ => Unknown,
            },
            Expr::Equals(a, b) => {
                let a = self.eval(a, visiting)?;
                let b = self.eval(b, visiting)?;
                match (a, b) {
                    (Invalid(why), _) | (_, Invalid(why)) => Invalid(why),
                    (Unknown, _) | (_, Unknown) => Unknown,
                    (Known(a), Known(b)) => Known(Json::Bool(loosely_equal(&a, &b))),
                }
            }
            Expr::And(items) | Expr::Or(items) => {
                let values = match self.booleans(items, visiting)? {
                    Ok(values) => values,
                    Err(state) => return Ok(state),
                };
                let result = if matches!(expr, Expr::And(_)) {
                    values.iter().all(|b| *b)
                } else {
                    values.iter().any(|b| *b)
                };
                Known(Json::Bool(result))
            }
            Expr::Not(inner) => match self.booleans(std::slice::from_ref(&**inner), visiting)? {
                Ok(values) => Known(Json::Bool(!values[0])),
                Err(state) => state,
            },
            Expr::Condition(name) => self.named_condition(name, visiting)?,
            Expr::Opaque { args, .. } => match self.eval(args, visiting)? {
                Invalid(why) => Invalid(why),
                _ => Unknown,
            },
        })
    }

    /// Evaluates every item; `Err` carries the combined non-known state, with
    /// `Invalid` taking precedence over `Unknown`.
    fn all<'a>(
        &self,
        items: impl Iterator<Item = &'a Expr>,
        visiting: &mut Vec<String>,
    ) -> Result<Result<Vec<Json>, ResolvedValue>, ResolveError> {
        let mut out = Vec::new();
        let mut unknown = false;
        for item in items {
            match self.eval(item, visiting)? {
                Known(v) => out.push(v),
                Unknown => unknown = true,
                Invalid(why) => return Ok(Err(Invalid(why))),
            }
        }
        Ok(if unknown { Err(Unknown) } else { Ok(out) })
    }

    fn booleans(
        &self,
        items: &[Expr],
        visiting: &mut Vec<String>,
    ) -> Result<Result<Vec<bool>, ResolvedValue>, ResolveError> {
        let values = match self.all(items.iter(), visiting)? {
            Ok(values) => values,
            Err(state) => return Ok(Err(state)),
        };
        Ok(values
            .iter()
            .map(|v| v.as_bool())
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Invalid("condition function expects booleans".to_string())))
    }

    fn named_condition(&self, name: &str, visiting: &mut Vec<String>) -> Result<ResolvedValue, ResolveError> {
        let expr = self.template.conditions.get(name).ok_or_else(|| unresolved(name))?;
        if visiting.iter().any(|v| v == name) {
            return Ok(Invalid(format!("condition {name} refers to itself")));
        }
        visiting.push(name.to_string());
        let result = self.eval(expr, visiting);
        visiting.pop();
        result
    }

    fn substitute(&self, parts: &[SubPart], visiting: &mut Vec<String>) -> Result<ResolvedValue, ResolveError> {
        let mut out = String::new();
        let mut unknown = false;
        for part in parts {
            match part {
                SubPart::Text(t) => out.push_str(t),
                SubPart::Placeholder(e) => match self.eval(e, visiting)? {
                    Known(v) => match scalar_text(&v) {
                        Some(s) => out.push_str(&s),
                        None => return Ok(Invalid(format!("cannot substitute {v}"))),
                    },
                    Unknown => unknown = true,
                    Invalid(why) => return Ok(Invalid(why)),
                },
            }
        }
        Ok(if unknown { Unknown } else { Known(Json::String(out)) })
    }

    fn parameter(&self, p: &Parameter) -> ResolvedValue {
        let Some(value) = self.context.parameters.get(&p.name).or(p.default.as_ref()) else {
            return Unknown;
        };
        if let Some(why) = violates_constraints(p, value) {
            return Invalid(why);
        }
        match value {
            Json::String(s) if p.is_list() => {
                Known(Json::Array(s.split(',').map(|i| Json::String(i.trim().to_string())).collect()))
            }
            other => Known(other.clone()),
        }
    }

    fn pseudo(&self, p: PseudoParameter) -> ResolvedValue {
        let known = |v: &Option<String>| v.clone().map(|s| Known(Json::String(s))).unwrap_or(Unknown);
        match p {
            PseudoParameter::AccountId => known(&self.context.account_id),
            PseudoParameter::Region => known(&self.context.region),
            PseudoParameter::Partition => known(&self.context.partition),
            PseudoParameter::StackName => known(&self.context.stack_name),
            PseudoParameter::UrlSuffix => known(&self.context.url_suffix),
            PseudoParameter::StackId | PseudoParameter::NotificationArns => Unknown,
            PseudoParameter::NoValue => Known(Json::Null),
            PseudoParameter::AvailabilityZones => match &self.context.availability_zones {
                Some(zones) => Known(Json::Array(zones.iter().cloned().map(Json::String).collect())),
                None => Unknown,
            },
        }
    }
}

fn unresolved(name: &str) -> ResolveError {
    ResolveError::UnresolvedReference { name: name.to_string() }
}

fn violates_constraints(p: &Parameter, value: &Json) -> Option<String> {
    if !p.allowed_values.is_empty() && !p.allowed_values.iter().any(|a| loosely_equal(a, value)) {
        return Some(format!("parameter {} value {value} is not among its allowed values", p.name));
    }
    if let (Some(pattern), Some(text)) = (&p.allowed_pattern, scalar_text(value)) {
        let anchored = Regex::new(&format!("^(?:{pattern})$")).ok()?;
        if !anchored.is_match(&text) {
            return Some(format!("parameter {} value {text:?} does not match {pattern}", p.name));
        }
    }
    None
}

/// Scalars compare by their text form, as CloudFormation does for parameters.
fn loosely_equal(a: &Json, b: &Json) -> bool {
    match (scalar_text(a), scalar_text(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn scalar_text(v: &Json) -> Option<String> {
    match v {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_index(v: &Json) -> Option<usize> {
    match v {
        Json::Number(n) => n.as_u64().and_then(|i| usize::try_from(i).ok()),
        Json::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
