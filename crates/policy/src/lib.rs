//! Compliance rules over loaded templates, the engine that runs them, policy
//! configuration, and report aggregation.

pub mod config;
pub mod engine;
pub mod finding;
pub mod report;
pub mod rule;
pub mod rules;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{DeployContext, PolicyConfig, RuleConfig};
pub use engine::{evaluate, Engine, Registered, RuleSet, BROKEN_REFERENCE, CONDITION, OUTPUT, RULE_ERROR};
pub use finding::{Finding, Origin, Severity, Violation};
pub use report::{aggregate, aggregate_with, Report, Status, Summary};
pub use rule::{Probe, Rule, RuleContext, RuleError, Targets};
