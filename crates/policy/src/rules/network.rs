use serde::Deserialize;
use serde_json::Value as Json;
use stackcheck_core::{Expr, Lookup, ResolvedValue};
use std::collections::BTreeMap;

use crate::finding::{Severity, Violation};
use crate::rule::{Rule, RuleContext, RuleError, Targets};

const UNIVERSAL: [&str; 2] = ["0.0.0.0/0", "::/0"];

fn default_ports() -> Vec<u16> {
    vec![22, 3389]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {
    #[serde(default = "default_ports")]
    pub sensitive_ports: Vec<u16>,
}

impl Default for Options {
    fn default() -> Self {
        Self { sensitive_ports: default_ports() }
    }
}

#[derive(Debug)]
pub struct NetworkExposure {
    ports: Vec<u16>,
}

impl NetworkExposure {
    pub fn new(options: Options) -> Self {
        Self { ports: options.sensitive_ports }
    }
}

/// A tri-state answer for one aspect of an ingress rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    Yes,
    No,
    Unknown,
}

fn port(value: &ResolvedValue) -> Option<Option<i64>> {
    match value {
        ResolvedValue::Known(Json::Null) => Some(None),
        ResolvedValue::Known(Json::Number(n)) => n.as_i64().map(Some),
        ResolvedValue::Known(Json::String(s)) => s.trim().parse().ok().map(Some),
        _ => None,
    }
}

impl NetworkExposure {
    fn resolve(cx: &RuleContext<'_>, rule: &BTreeMap<String, Expr>, key: &str) -> Result<ResolvedValue, RuleError> {
        match rule.get(key) {
            Some(e) => cx.resolve(e),
            None => Ok(ResolvedValue::Known(Json::Null)),
        }
    }

    fn open_to_world(cx: &RuleContext<'_>, rule: &BTreeMap<String, Expr>) -> Result<Answer, RuleError> {
        let mut unknown = false;
        for key in ["CidrIp", "CidrIpv6"] {
            match Self::resolve(cx, rule, key)? {
                ResolvedValue::Known(Json::String(cidr)) if UNIVERSAL.contains(&cidr.trim()) => return Ok(Answer::Yes),
                ResolvedValue::Known(_) => {}
                ResolvedValue::Unknown | ResolvedValue::Invalid(_) => unknown = true,
            }
        }
        Ok(if unknown { Answer::Unknown } else { Answer::No })
    }

    /// Whether the rule admits all traffic or a sensitive port.
    fn covers_sensitive(
        &self,
        cx: &RuleContext<'_>,
        rule: &BTreeMap<String, Expr>,
    ) -> Result<(Answer, String), RuleError> {
        let protocol = match Self::resolve(cx, rule, "IpProtocol")? {
            ResolvedValue::Known(Json::String(p)) => p.to_ascii_lowercase(),
            ResolvedValue::Known(Json::Number(n)) => n.to_string(),
            ResolvedValue::Known(_) => "-1".to_string(),
            ResolvedValue::Unknown | ResolvedValue::Invalid(_) => return Ok((Answer::Unknown, "protocol".into())),
        };
        if protocol == "-1" || protocol == "all" {
            return Ok((Answer::Yes, "all traffic".into()));
        }
        if !matches!(protocol.as_str(), "tcp" | "udp" | "6" | "17") {
            return Ok((Answer::No, protocol));
        }
        let (Some(from), Some(to)) = (
            port(&Self::resolve(cx, rule, "FromPort")?),
            port(&Self::resolve(cx, rule, "ToPort")?),
        ) else {
            return Ok((Answer::Unknown, "port range".into()));
        };
        let from = from.filter(|p| *p >= 0).unwrap_or(0);
        let to = to.filter(|p| *p >= 0).unwrap_or(65535);
        Ok(match self.ports.iter().find(|p| (from..=to).contains(&i64::from(**p))) {
            Some(p) => (Answer::Yes, format!("port {p}")),
            None => (Answer::No, format!("ports {from}-{to}")),
        })
    }

    fn ingress(
        &self,
        cx: &RuleContext<'_>,
        rule: &BTreeMap<String, Expr>,
        path: String,
    ) -> Result<Option<Violation>, RuleError> {
        let open = Self::open_to_world(cx, rule)?;
        if open == Answer::No {
            return Ok(None);
        }
        let (covers, what) = self.covers_sensitive(cx, rule)?;
        Ok(match (open, covers) {
            (Answer::Yes, Answer::Yes) => {
                Some(Violation::new(Severity::Critical, path, format!("ingress allows {what} from anywhere")))
            }
            (_, Answer::No) => None,
            (Answer::Yes, _) => Some(Violation::new(
                Severity::Medium,
                path,
                format!("ingress is open to anywhere and its {what} cannot be determined statically"),
            )),
            _ => Some(Violation::new(
                Severity::Medium,
                path,
                format!("ingress source cannot be determined statically for {what}"),
            )),
        })
    }
}

impl Rule for NetworkExposure {
    fn id(&self) -> &'static str {
        "network-exposure"
    }

    fn description(&self) -> &'static str {
        "security groups must not expose sensitive ports or all traffic to the internet"
    }

    fn default_severity(&self) -> Severity {
        Severity::Critical
    }

    fn targets(&self) -> Targets {
        Targets::Types(&["AWS::EC2::SecurityGroup", "AWS::EC2::SecurityGroupIngress"])
    }

    fn check(&self, cx: &RuleContext<'_>) -> Result<Vec<Violation>, RuleError> {
        if cx.resource.resource_type == "AWS::EC2::SecurityGroupIngress" {
            return Ok(self.ingress(cx, &cx.resource.properties, "Properties".to_string())?.into_iter().collect());
        }

        let mut out = Vec::new();
        let rules = match cx.lookup(&["SecurityGroupIngress"])? {
            Lookup::Found(r) => r,
            Lookup::Absent => return Ok(out),
            Lookup::Unknown | Lookup::Invalid(_) => {
                out.push(Violation::new(
                    Severity::Medium,
                    "Properties.SecurityGroupIngress",
                    "ingress rules cannot be determined statically",
                ));
                return Ok(out);
            }
        };
        let Expr::List(items) = rules.as_ref() else {
            out.push(Violation::new(Severity::Medium, "Properties.SecurityGroupIngress", "ingress rules are computed"));
            return Ok(out);
        };
        for (i, item) in items.iter().enumerate() {
            let path = format!("Properties.SecurityGroupIngress[{i}]");
            match cx.resolver.peel(item)? {
                None => {}
                Some(Lookup::Found(rule)) => match rule.as_ref() {
                    Expr::Map(m) => out.extend(self.ingress(cx, m, path)?),
                    _ => out.push(Violation::new(Severity::Medium, path, "ingress rule is computed")),
                },
                Some(_) => {
                    out.push(Violation::new(Severity::Medium, path, "ingress rule cannot be determined statically"))
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::check;
    use serde_json::json;

    fn rule() -> NetworkExposure {
        NetworkExposure::new(Options::default())
    }

    fn group(ingress: Json) -> Json {
        json!({ "Type": "AWS::EC2::SecurityGroup", "Properties": {
            "GroupDescription": "web", "SecurityGroupIngress": ingress
        }})
    }

    #[test]
    fn ssh_from_anywhere_is_critical() {
        let ssh = json!([{ "IpProtocol": "tcp", "FromPort": 22, "ToPort": 22, "CidrIp": "0.0.0.0/0" }]);
        let v = check(&rule(), group(ssh));
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].severity, Severity::Critical);
        assert_eq!(v[0].path, "Properties.SecurityGroupIngress[0]");
    }

    #[test]
    fn private_ranges_and_public_web_ports_pass() {
        let v = check(
            &rule(),
            group(json!([
                { "IpProtocol": "tcp", "FromPort": 22, "ToPort": 22, "CidrIp": "10.0.0.0/8" },
                { "IpProtocol": "tcp", "FromPort": 443, "ToPort": 443, "CidrIp": "0.0.0.0/0" },
                { "IpProtocol": "tcp", "FromPort": 22, "ToPort": 22, "SourceSecurityGroupId": "sg-123" }
            ])),
        );
        assert!(v.is_empty(), "{v:?}");
    }

    #[test]
    fn ranges_and_all_traffic_are_caught() {
        let v = check(
            &rule(),
            group(json!([
                { "IpProtocol": "tcp", "FromPort": "3000", "ToPort": "4000", "CidrIpv6": "::/0" },
                { "IpProtocol": -1, "CidrIp": "0.0.0.0/0" }
            ])),
        );
        assert_eq!(v.len(), 2);
        assert!(v[0].message.contains("3389"));
        assert!(v[1].message.contains("all traffic"));
    }

    #[test]
    fn standalone_ingress_resources_are_checked() {
        let v = check(
            &rule(),
            json!({ "Type": "AWS::EC2::SecurityGroupIngress", "Properties": {
                "GroupId": "sg-1", "IpProtocol": "tcp", "FromPort": 3389, "ToPort": 3389, "CidrIp": "0.0.0.0/0"
            }}),
        );
        assert_eq!(v[0].path, "Properties");
        assert_eq!(v[0].severity, Severity::Critical);
    }

    #[test]
    fn computed_sources_are_medium() {
        let v = check(
            &rule(),
            group(json!([{ "IpProtocol": "tcp", "FromPort": 22, "ToPort": 22, "CidrIp": { "Ref": "Toggle" } }])),
        );
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].severity, Severity::Medium);
    }
}
