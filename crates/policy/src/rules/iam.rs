use regex::Regex;
use serde::Deserialize;
use serde_json::Value as Json;
use stackcheck_core::{Expr, Lookup};
use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::finding::{Severity, Violation};
use crate::rule::{string_list, Rule, RuleContext, RuleError, Targets};

const TYPES: &[&str] = &[
    "AWS::IAM::Policy",
    "AWS::IAM::ManagedPolicy",
    "AWS::IAM::Role",
    "AWS::IAM::User",
    "AWS::IAM::Group",
];

fn default_admin_patterns() -> Vec<String> {
    [
        r"^iam:\*$",
        r"^iam:(Attach|Create|Delete|Pass|Put|Update)",
        r"^organizations:",
        r"^kms:\*$",
        r"^sts:\*$",
        r"^account:",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {
    /// Regexes, matched case-insensitively, marking administrative actions.
    #[serde(default = "default_admin_patterns")]
    pub admin_action_patterns: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self { admin_action_patterns: default_admin_patterns() }
    }
}

#[derive(Debug)]
pub struct LeastPrivilege {
    admin: Vec<Regex>,
}

impl LeastPrivilege {
    pub fn new(options: Options) -> Result<Self, regex::Error> {
        let admin = options
            .admin_action_patterns
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")))
            .collect::<Result<_, _>>()?;
        Ok(Self { admin })
    }

    fn is_admin(&self, action: &str) -> bool {
        self.admin.iter().any(|r| r.is_match(action))
    }
}

/// Whether one side of a statement contains the universal wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Side {
    Universal,
    Specific(Vec<String>),
    Unknown,
}

fn universal_action(a: &str) -> bool {
    a == "*" || a == "*:*"
}

impl LeastPrivilege {
    /// Resolves a string-or-list field element by element, so one
    /// deploy-time ARN does not hide a literal `*` next to it.
    fn side(&self, cx: &RuleContext<'_>, expr: Option<&Expr>, universal: fn(&str) -> bool) -> Result<Side, RuleError> {
        let Some(expr) = expr else { return Ok(Side::Specific(Vec::new())) };
        let items: Vec<&Expr> = match expr {
            Expr::List(items) => items.iter().collect(),
            other => vec![other],
        };
        let mut known = Vec::new();
        let mut unknown = false;
        for item in items {
            match cx.resolve(item)?.as_known().and_then(string_list) {
                Some(values) => known.extend(values),
                None => unknown = true,
            }
        }
        Ok(if known.iter().any(|v| universal(v)) {
            Side::Universal
        } else if unknown {
            Side::Unknown
        } else {
            Side::Specific(known)
        })
    }

    fn statement(
        &self,
        cx: &RuleContext<'_>,
        stmt: &BTreeMap<String, Expr>,
        path: &str,
        out: &mut Vec<Violation>,
    ) -> Result<(), RuleError> {
        let effect = match stmt.get("Effect") {
            Some(e) => cx.resolve(e)?,
            None => return Ok(()),
        };
        match effect.as_known() {
            Some(Json::String(s)) if s == "Allow" => {}
            Some(_) => return Ok(()),
            None => {
                out.push(Violation::new(Severity::Medium, path, "statement effect cannot be determined statically"));
                return Ok(());
            }
        }

        let resources = self.side(cx, stmt.get("Resource"), |r| r == "*")?;
        if let Some(not_action) = stmt.get("NotAction") {
            if resources == Side::Universal {
                out.push(Violation::new(
                    Severity::High,
                    path,
                    format!("Allow with NotAction ({not_action}) on every resource grants all other actions"),
                ));
            }
            return Ok(());
        }
        let actions = self.side(cx, stmt.get("Action"), universal_action)?;
        let admin: Vec<&str> = match &actions {
            Side::Specific(a) => a.iter().map(String::as_str).filter(|a| self.is_admin(a)).collect(),
            _ => Vec::new(),
        };

        let violation = match (&actions, &resources) {
            (Side::Universal, Side::Universal) => Some(Violation::new(
                Severity::Critical,
                path,
                "statement allows every action on every resource",
            )),
            (_, Side::Universal) if !admin.is_empty() => Some(Violation::new(
                Severity::High,
                path,
                format!("administrative actions {} are allowed on every resource", admin.join(", ")),
            )),
            (Side::Universal, Side::Specific(r)) => Some(Violation::new(
                Severity::High,
                path,
                format!("statement allows every action on {}", r.join(", ")),
            )),
            (Side::Unknown, Side::Universal | Side::Unknown) | (Side::Universal, Side::Unknown) => Some(
                Violation::new(Severity::Medium, path, "statement scope cannot be determined statically"),
            ),
            (Side::Specific(_), Side::Unknown) if !admin.is_empty() => Some(Violation::new(
                Severity::Medium,
                path,
                format!(
                    "administrative actions {} on resources that cannot be determined statically",
                    admin.join(", ")
                ),
            )),
            _ => None,
        };
        out.extend(violation);
        Ok(())
    }

    fn document(
        &self,
        cx: &RuleContext<'_>,
        doc: Lookup<'_>,
        path: &str,
        out: &mut Vec<Violation>,
    ) -> Result<(), RuleError> {
        let doc = match doc {
            Lookup::Found(d) => d,
            Lookup::Absent => return Ok(()),
            Lookup::Unknown | Lookup::Invalid(_) => {
                out.push(Violation::new(Severity::Medium, path, "policy document cannot be determined statically"));
                return Ok(());
            }
        };
        let Expr::Map(doc) = doc.as_ref() else {
            out.push(Violation::new(Severity::Medium, path, "policy document is computed"));
            return Ok(());
        };
        let Some(statements) = doc.get("Statement") else { return Ok(()) };
        let statements: Vec<Cow<'_, Expr>> = match peel(cx, statements)? {
            Some(Cow::Borrowed(Expr::List(items))) => items.iter().map(Cow::Borrowed).collect(),
            Some(single) => vec![single],
            None => return Ok(()),
        };
        for (i, stmt) in statements.iter().enumerate() {
            let at = format!("{path}.Statement[{i}]");
            match peel(cx, stmt)? {
                Some(s) => match s.as_ref() {
                    Expr::Map(m) => self.statement(cx, m, &at, out)?,
                    _ => out.push(Violation::new(Severity::Medium, &at, "statement is computed")),
                },
                None => {}
            }
        }
        Ok(())
    }
}

/// Peels conditionals, collapsing undeterminable ones into `Some(expr)` of the
/// input expression so callers report them as computed.
fn peel<'e>(cx: &RuleContext<'_>, expr: &'e Expr) -> Result<Option<Cow<'e, Expr>>, RuleError> {
    Ok(match cx.resolver.peel(expr)? {
        None => None,
        Some(Lookup::Found(e)) => Some(e),
        Some(_) => Some(Cow::Borrowed(expr)),
    })
}

impl Rule for LeastPrivilege {
    fn id(&self) -> &'static str {
        "iam-least-privilege"
    }

    fn description(&self) -> &'static str {
        "IAM statements must not allow wildcard actions on wildcard resources"
    }

    fn default_severity(&self) -> Severity {
        Severity::Critical
    }

    fn targets(&self) -> Targets {
        Targets::Types(TYPES)
    }

    fn check(&self, cx: &RuleContext<'_>) -> Result<Vec<Violation>, RuleError> {
        let mut out = Vec::new();
        match cx.resource.resource_type.as_str() {
            "AWS::IAM::Policy" | "AWS::IAM::ManagedPolicy" => {
                let doc = cx.lookup(&["PolicyDocument"])?;
                self.document(cx, doc, "Properties.PolicyDocument", &mut out)?;
            }
            _ => {
                let policies = match cx.lookup(&["Policies"])? {
                    Lookup::Found(p) => p,
                    Lookup::Absent => return Ok(out),
                    Lookup::Unknown | Lookup::Invalid(_) => {
                        out.push(Violation::new(
                            Severity::Medium,
                            "Properties.Policies",
                            "inline policies cannot be determined statically",
                        ));
                        return Ok(out);
                    }
                };
                let Expr::List(items) = policies.as_ref() else { return Ok(out) };
                for (i, item) in items.iter().enumerate() {
                    let Some(policy) = peel(cx, item)? else { continue };
                    let doc = match policy.as_ref() {
                        Expr::Map(m) => match m.get("PolicyDocument") {
                            Some(d) => cx.resolver.peel(d)?.unwrap_or(Lookup::Absent),
                            None => Lookup::Absent,
                        },
                        _ => Lookup::Unknown,
                    };
                    self.document(cx, doc, &format!("Properties.Policies[{i}].PolicyDocument"), &mut out)?;
                }
            }
        }
        Ok(out)
    }
}
