use serde_json::Value as Json;
use stackcheck_core::{Expr, ResolutionContext, ResolvedValue, Resolver, Resource, Template};
use stackcheck_policy::{evaluate, Engine, Finding, Origin, Report, RuleSet, Severity};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::retry::{collect, ReconciliationError, RetryPolicy};
use crate::source::{LiveResourceSnapshot, LiveStateSource, StackOutputs};

/// Id of the finding for a declared resource with no live counterpart.
pub const NOT_DEPLOYED: &str = "not-deployed";

/// Runs `rules` against the live attributes of every deployed resource.
/// Findings the template alone does not produce are marked as drift.
pub fn reconcile(
    expected: &Template,
    live: &LiveResourceSnapshot,
    rules: &RuleSet,
) -> Result<Vec<Finding>, ReconciliationError> {
    reconcile_in(expected, live, &ResolutionContext::default(), |t| evaluate(t, rules))
}

fn reconcile_in<F>(
    expected: &Template,
    live: &LiveResourceSnapshot,
    context: &ResolutionContext,
    eval: F,
) -> Result<Vec<Finding>, ReconciliationError>
where
    F: Fn(&Template) -> Vec<Finding>,
{
    let derived = expected.map_resources(|r| live.resources.get(&r.logical_id).map(|l| observed(r, &l.properties)))?;
    let declared: HashSet<(String, String, String, Severity)> = eval(expected).into_iter().map(key).collect();

    let mut by_resource: HashMap<String, Vec<Finding>> = HashMap::new();
    // Condition and output findings belong to the template, not to live state.
    let owned = |f: &Finding| derived.resource(&f.resource).is_some_and(|r| r.resource_type == f.resource_type);
    for mut f in eval(&derived).into_iter().filter(owned) {
        f.origin = if declared.contains(&key(f.clone())) { Origin::Live } else { Origin::Drift };
        by_resource.entry(f.resource.clone()).or_default().push(f);
    }

    let resolver = Resolver::new(expected, context);
    let mut out = Vec::new();
    for r in expected.resources() {
        if live.unavailable.contains_key(&r.logical_id) {
            continue;
        }
        if live.resources.contains_key(&r.logical_id) {
            out.extend(by_resource.remove(&r.logical_id).unwrap_or_default());
        } else if !excluded_by_condition(&resolver, r) {
            out.push(Finding {
                resource: r.logical_id.clone(),
                resource_type: r.resource_type.clone(),
                rule: NOT_DEPLOYED.to_string(),
                severity: Severity::Info,
                path: String::new(),
                message: "declared in the template but not found in the live stack".to_string(),
                origin: Origin::Live,
            });
        }
    }
    Ok(out)
}

/// The template's view of a resource with its properties replaced by what was
/// observed. Dependencies are dropped; live values are literal.
fn observed(declared: &Resource, properties: &serde_json::Map<String, Json>) -> Resource {
    Resource {
        properties: properties.iter().map(|(k, v)| (k.clone(), Expr::literal(v))).collect(),
        depends_on: Vec::new(),
        condition: None,
        ..declared.clone()
    }
}

fn key(f: Finding) -> (String, String, String, Severity) {
    (f.resource, f.rule, f.path, f.severity)
}

/// Resources whose condition is known false are not expected to exist.
fn excluded_by_condition(resolver: &Resolver<'_>, r: &Resource) -> bool {
    let Some(name) = &r.condition else { return false };
    matches!(resolver.condition(name), Ok(ResolvedValue::Known(Json::Bool(false))))
}

/// Collects live state and reconciles it into a report. Unavailable resources
/// or an exhausted retry budget yield an `incomplete` report that keeps the
/// findings gathered so far.
pub async fn reconcile_stack(
    source: &dyn LiveStateSource,
    outputs: &StackOutputs,
    expected: &Template,
    engine: &Engine,
    retry: &RetryPolicy,
    fail_on: Severity,
) -> Result<Report, ReconciliationError> {
    let live = match collect(source, outputs, retry).await {
        Ok(live) => live,
        Err(e) if e.is_exhaustion() => {
            warn!(error = %e, "reporting template findings only");
            return Ok(Report::incomplete(engine.evaluate(expected), fail_on, e.to_string()));
        }
        Err(e) => return Err(e),
    };
    let findings = reconcile_in(expected, &live, engine.context(), |t| engine.evaluate(t))?;
    info!(
        deployed = live.resources.len(),
        unavailable = live.unavailable.len(),
        findings = findings.len(),
        "reconciled live state"
    );
    if live.unavailable.is_empty() {
        return Ok(stackcheck_policy::aggregate_with(findings, fail_on));
    }
    let reason = live.unavailable.iter().map(|(id, why)| format!("{id} ({why})")).collect::<Vec<_>>().join(", ");
    Ok(Report::incomplete(findings, fail_on, format!("unavailable: {reason}")))
}
