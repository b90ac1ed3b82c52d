use std::any::Any;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};

use stackcheck_core::{Expr, Reference, ResolutionContext, ResolveError, Resolver, Resource, Template};
use tracing::{debug, warn};

use crate::finding::{Finding, Origin, Severity, Violation};
use crate::rule::{Rule, RuleContext, RuleError};
use crate::rules;

/// Id of the finding emitted for a resource that names something undeclared.
pub const BROKEN_REFERENCE: &str = "broken-reference";
/// Id of the finding emitted when a rule fails or panics.
pub const RULE_ERROR: &str = "rule-error";

/// `resource_type` of findings attributed to a condition or an output.
pub const CONDITION: &str = "Condition";
pub const OUTPUT: &str = "Output";

/// A rule plus the per-run settings configuration layers on top of it.
pub struct Registered {
    rule: Box<dyn Rule>,
    severity: Option<Severity>,
    resource_types: Option<HashSet<String>>,
}

impl Registered {
    pub fn rule(&self) -> &dyn Rule {
        self.rule.as_ref()
    }

    /// Severity every violation of this rule is reported at, if overridden.
    pub fn severity(&self) -> Option<Severity> {
        self.severity
    }

    fn applies_to(&self, resource: &Resource) -> bool {
        match &self.resource_types {
            Some(types) => types.contains(&resource.resource_type),
            None => self.rule.targets().matches(resource),
        }
    }
}

/// Rules in registration order.
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<Registered>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in rule with its default options.
    pub fn builtin() -> anyhow::Result<Self> {
        let mut set = Self::new();
        for rule in rules::all()? {
            set.register(rule);
        }
        Ok(set)
    }

    pub fn register(&mut self, rule: Box<dyn Rule>) -> &mut Self {
        self.register_with(rule, None, None)
    }

    /// Registers `rule`, optionally replacing its emitted severity and the
    /// resource types it applies to.
    pub fn register_with(
        &mut self,
        rule: Box<dyn Rule>,
        severity: Option<Severity>,
        resource_types: Option<HashSet<String>>,
    ) -> &mut Self {
        self.rules.push(Registered { rule, severity, resource_types });
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registered> {
        self.rules.iter()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.rule.id()).collect()
    }
}

/// Evaluates `template` with default resolution context on one thread.
pub fn evaluate(template: &Template, rules: &RuleSet) -> Vec<Finding> {
    let context = ResolutionContext::default();
    evaluate_in(template, rules, &context, 1)
}

pub struct Engine {
    rules: RuleSet,
    context: ResolutionContext,
    workers: usize,
}

impl Engine {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules, context: ResolutionContext::default(), workers: 1 }
    }

    pub fn with_context(mut self, context: ResolutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn context(&self) -> &ResolutionContext {
        &self.context
    }

    pub fn evaluate(&self, template: &Template) -> Vec<Finding> {
        evaluate_in(template, &self.rules, &self.context, self.workers)
    }
}

/// Findings ordered by resource declaration order, then rule registration
/// order, regardless of the worker count.
#[tracing::instrument(skip_all, fields(resources = template.resources().len(), rules = rules.len(), workers = workers))]
fn evaluate_in(template: &Template, rules: &RuleSet, context: &ResolutionContext, workers: usize) -> Vec<Finding> {
    let resolver = Resolver::new(template, context);
    let resources = template.resources();
    let workers = workers.clamp(1, resources.len().max(1));

    let mut findings: Vec<Finding> = if workers == 1 {
        resources.iter().flat_map(|r| evaluate_resource(resolver, rules, r)).collect()
    } else {
        let chunk = resources.len().div_ceil(workers);
        std::thread::scope(|scope| {
            let handles: Vec<_> = resources
                .chunks(chunk)
                .map(|part| {
                    let handle = scope.spawn(move || {
                        part.iter().flat_map(|r| evaluate_resource(resolver, rules, r)).collect::<Vec<_>>()
                    });
                    (part, handle)
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|(part, h)| worker_findings(part, h.join()))
                .collect()
        })
    };
    findings.extend(section_references(template));
    debug!(findings = findings.len(), "evaluation finished");
    findings
}

/// A worker only dies on a bug in the engine itself, since rule panics are
/// caught per rule. Its resources are then reported as not evaluated.
fn worker_findings(part: &[Resource], joined: std::thread::Result<Vec<Finding>>) -> Vec<Finding> {
    match joined {
        Ok(found) => found,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(error = %message, resources = part.len(), "evaluation worker panicked");
            part.iter().map(|r| rule_error(r, "engine", format!("evaluation worker panicked: {message}"))).collect()
        }
    }
}

fn evaluate_resource(resolver: Resolver<'_>, rules: &RuleSet, resource: &Resource) -> Vec<Finding> {
    if let Some((path, message)) = broken_reference(resolver.template(), resource) {
        return vec![broken(resource, path, message)];
    }
    let cx = RuleContext::new(resource, resolver);
    let mut out = Vec::new();
    for entry in rules.iter().filter(|e| e.applies_to(resource)) {
        let id = entry.rule.id();
        match catch_unwind(AssertUnwindSafe(|| entry.rule.check(&cx))) {
            Ok(Ok(violations)) => out.extend(violations.into_iter().map(|v| {
                let severity = entry.severity.unwrap_or(v.severity);
                attribute(resource, id, Violation { severity, ..v })
            })),
            Ok(Err(RuleError::Resolve(ResolveError::UnresolvedReference { name }))) => {
                let message = format!("reference to undeclared name '{name}'");
                return vec![broken(resource, "Properties".to_string(), message)];
            }
            Ok(Err(e)) => {
                warn!(resource = %resource.logical_id, rule = id, error = %e, "rule failed");
                out.push(rule_error(resource, id, e.to_string()));
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(resource = %resource.logical_id, rule = id, error = %message, "rule panicked");
                out.push(rule_error(resource, id, format!("rule panicked: {message}")));
            }
        }
    }
    out
}

/// First name the resource uses that the template does not declare.
fn broken_reference(template: &Template, resource: &Resource) -> Option<(String, String)> {
    if let Some(dep) = resource.depends_on.iter().find(|d| template.resource(d).is_none()) {
        return Some(("DependsOn".to_string(), format!("depends on undeclared resource '{dep}'")));
    }
    if let Some(c) = resource.condition.as_ref().filter(|c| !template.conditions.contains_key(*c)) {
        return Some(("Condition".to_string(), format!("guarded by undeclared condition '{c}'")));
    }
    resource.properties.iter().find_map(|(key, expr)| {
        dangling(template, expr).map(|message| (format!("Properties.{key}"), message))
    })
}

/// First name `expr` uses that the template does not declare.
fn dangling(template: &Template, expr: &Expr) -> Option<String> {
    let mut missing = None;
    expr.visit_references(&mut |r| {
        if missing.is_some() {
            return;
        }
        missing = match r {
            Reference::Entity(n) if !template.declares(n) => Some(format!("reference to undeclared name '{n}'")),
            Reference::Attribute(n) if template.resource(n).is_none() => {
                Some(format!("attribute of undeclared resource '{n}'"))
            }
            Reference::Condition(n) if !template.conditions.contains_key(n) => {
                Some(format!("undeclared condition '{n}'"))
            }
            Reference::Mapping(n) if !template.mappings.contains_key(n) => Some(format!("undeclared mapping '{n}'")),
            _ => None,
        };
    });
    missing
}

/// Broken references in condition bodies and outputs, attributed to the
/// condition or output that holds them.
fn section_references(template: &Template) -> Vec<Finding> {
    let mut out = Vec::new();
    for (name, body) in &template.conditions {
        if let Some(message) = dangling(template, body) {
            out.push(section_broken(name, CONDITION, String::new(), message));
        }
    }
    for (name, output) in &template.outputs {
        let found = output
            .condition
            .as_ref()
            .filter(|c| !template.conditions.contains_key(*c))
            .map(|c| ("Condition", format!("guarded by undeclared condition '{c}'")))
            .or_else(|| dangling(template, &output.value).map(|m| ("Value", m)))
            .or_else(|| output.export_name.as_ref().and_then(|e| dangling(template, e)).map(|m| ("Export.Name", m)));
        if let Some((path, message)) = found {
            out.push(section_broken(name, OUTPUT, path.to_string(), message));
        }
    }
    out
}

fn section_broken(name: &str, kind: &str, path: String, message: String) -> Finding {
    Finding {
        resource: name.to_string(),
        resource_type: kind.to_string(),
        rule: BROKEN_REFERENCE.to_string(),
        severity: Severity::Critical,
        path,
        message,
        origin: Origin::Template,
    }
}

fn attribute(resource: &Resource, rule: &str, v: Violation) -> Finding {
    Finding {
        resource: resource.logical_id.clone(),
        resource_type: resource.resource_type.clone(),
        rule: rule.to_string(),
        severity: v.severity,
        path: v.path,
        message: v.message,
        origin: Origin::Template,
    }
}

fn broken(resource: &Resource, path: String, message: String) -> Finding {
    attribute(resource, BROKEN_REFERENCE, Violation::new(Severity::Critical, path, message))
}

fn rule_error(resource: &Resource, rule: &str, message: String) -> Finding {
    attribute(resource, RULE_ERROR, Violation::new(Severity::Info, String::new(), format!("{rule}: {message}")))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
