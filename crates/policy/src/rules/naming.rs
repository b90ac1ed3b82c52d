use serde::Deserialize;
use stackcheck_core::{Expr, PseudoParameter};

use crate::finding::{Severity, Violation};
use crate::rule::{property_path, Rule, RuleContext, RuleError, Targets};

fn default_suffix() -> String {
    "EnvironmentSuffix".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {
    /// Parameter every explicit physical name must incorporate.
    #[serde(default = "default_suffix")]
    pub suffix_parameter: String,
}

impl Default for Options {
    fn default() -> Self {
        Self { suffix_parameter: default_suffix() }
    }
}

/// Explicit physical names must vary per environment, or two stacks of the
/// same template collide.
#[derive(Debug)]
pub struct ParameterizedNaming {
    suffix: String,
}

impl ParameterizedNaming {
    pub fn new(options: Options) -> Self {
        Self { suffix: options.suffix_parameter }
    }
}

impl Rule for ParameterizedNaming {
    fn id(&self) -> &'static str {
        "parameterized-naming"
    }

    fn description(&self) -> &'static str {
        "explicit resource names must incorporate the environment suffix parameter"
    }

    fn default_severity(&self) -> Severity {
        Severity::Medium
    }

    fn targets(&self) -> Targets {
        Targets::Named
    }

    fn check(&self, cx: &RuleContext<'_>) -> Result<Vec<Violation>, RuleError> {
        let Some(property) = cx.resource.type_info().name_property else { return Ok(Vec::new()) };
        let Some(name) = cx.resource.property(property) else { return Ok(Vec::new()) };
        let path = property_path(&[property]);
        let violation = match name {
            Expr::Pseudo(PseudoParameter::NoValue) => None,
            literal if literal.is_literal() => Some(Violation::new(
                Severity::Medium,
                path,
                format!("{property} is the fixed name {literal}; incorporate {}", self.suffix),
            )),
            expr if !expr.mentions(&self.suffix) => Some(Violation::new(
                Severity::Medium,
                path,
                format!("{property} does not incorporate {}", self.suffix),
            )),
            _ => None,
        };
        Ok(violation.into_iter().collect())
    }
}
