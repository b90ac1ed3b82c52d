use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as Json};
use std::collections::BTreeMap;
use std::fmt;

/// Values CloudFormation supplies without a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PseudoParameter {
    AccountId,
    Region,
    StackName,
    StackId,
    Partition,
    UrlSuffix,
    NotificationArns,
    NoValue,
    AvailabilityZones,
}

impl PseudoParameter {
    pub fn from_ref(name: &str) -> Option<Self> {
        Some(match name {
            "AWS::AccountId" => Self::AccountId,
            "AWS::Region" => Self::Region,
            "AWS::StackName" => Self::StackName,
            "AWS::StackId" => Self::StackId,
            "AWS::Partition" => Self::Partition,
            "AWS::URLSuffix" => Self::UrlSuffix,
            "AWS::NotificationARNs" => Self::NotificationArns,
            "AWS::NoValue" => Self::NoValue,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountId => "AWS::AccountId",
            Self::Region => "AWS::Region",
            Self::StackName => "AWS::StackName",
            Self::StackId => "AWS::StackId",
            Self::Partition => "AWS::Partition",
            Self::UrlSuffix => "AWS::URLSuffix",
            Self::NotificationArns => "AWS::NotificationARNs",
            Self::NoValue => "AWS::NoValue",
            Self::AvailabilityZones => "Fn::GetAZs",
        }
    }
}

/// One segment of a `Fn::Sub` template string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubPart {
    Text(String),
    Placeholder(Expr),
}

/// A property value as written in a template.
///
/// Plain JSON values become the literal variants; single-key maps naming an
/// intrinsic function are lifted into the matching variant by the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<Expr>),
    Map(BTreeMap<String, Expr>),
    /// `Ref` to a parameter or resource.
    Ref(String),
    Pseudo(PseudoParameter),
    GetAtt { resource: String, attribute: String },
    Sub(Vec<SubPart>),
    If { condition: String, then: Box<Expr>, otherwise: Box<Expr> },
    Select { index: Box<Expr>, list: Box<Expr> },
    Join { delimiter: String, items: Box<Expr> },
    Split { delimiter: String, source: Box<Expr> },
    FindInMap { map: String, top: Box<Expr>, second: Box<Expr> },
    Base64(Box<Expr>),
    ImportValue(Box<Expr>),
    Equals(Box<Expr>, Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Condition(String),
    /// Any other `Fn::` intrinsic; never statically known.
    Opaque { function: String, args: Box<Expr> },
}

/// A name an expression points at, tagged with the namespace it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference<'a> {
    /// `Ref`: parameter or resource.
    Entity(&'a str),
    /// `Fn::GetAtt`: resource only.
    Attribute(&'a str),
    Condition(&'a str),
    Mapping(&'a str),
}

impl Expr {
    /// Converts plain data without lifting intrinsics.
    pub fn literal(value: &Json) -> Expr {
        match value {
            Json::Null => Expr::Null,
            Json::Bool(b) => Expr::Bool(*b),
            Json::Number(n) => Expr::Number(n.clone()),
            Json::String(s) => Expr::String(s.clone()),
            Json::Array(items) => Expr::List(items.iter().map(Expr::literal).collect()),
            Json::Object(map) => {
                Expr::Map(map.iter().map(|(k, v)| (k.clone(), Expr::literal(v))).collect())
            }
        }
    }

    /// True when nothing in the tree is an intrinsic.
    pub fn is_literal(&self) -> bool {
        match self {
            Expr::Null | Expr::Bool(_) | Expr::Number(_) | Expr::String(_) => true,
            Expr::List(items) => items.iter().all(Expr::is_literal),
            Expr::Map(map) => map.values().all(Expr::is_literal),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Expr::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Expr>> {
        match self {
            Expr::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Calls `f` for every named reference reachable from this expression,
    /// including both branches of every `Fn::If`.
    pub fn visit_references<'a>(&'a self, f: &mut dyn FnMut(Reference<'a>)) {
        match self {
            Expr::Null | Expr::Bool(_) | Expr::Number(_) | Expr::String(_) | Expr::Pseudo(_) => {}
            Expr::List(items) | Expr::And(items) | Expr::Or(items) => {
                items.iter().for_each(|e| e.visit_references(f))
            }
            Expr::Map(map) => map.values().for_each(|e| e.visit_references(f)),
            Expr::Ref(name) => f(Reference::Entity(name)),
            Expr::GetAtt { resource, .. } => f(Reference::Attribute(resource)),
            Expr::Sub(parts) => {
                for part in parts {
                    if let SubPart::Placeholder(e) = part {
                        e.visit_references(f);
                    }
                }
            }
            Expr::If { condition, then, otherwise } => {
                f(Reference::Condition(condition));
                then.visit_references(f);
                otherwise.visit_references(f);
            }
            Expr::Select { index, list } => {
                index.visit_references(f);
                list.visit_references(f);
            }
            Expr::Join { items, .. } => items.visit_references(f),
            Expr::Split { source, .. } => source.visit_references(f),
            Expr::FindInMap { map, top, second } => {
                f(Reference::Mapping(map));
                top.visit_references(f);
                second.visit_references(f);
            }
            Expr::Base64(e) | Expr::ImportValue(e) | Expr::Not(e) => e.visit_references(f),
            Expr::Equals(a, b) => {
                a.visit_references(f);
                b.visit_references(f);
            }
            Expr::Condition(name) => f(Reference::Condition(name)),
            Expr::Opaque { args, .. } => args.visit_references(f),
        }
    }

    /// True if a `Ref` to `name` appears anywhere in the tree, substitution
    /// placeholders included.
    pub fn mentions(&self, name: &str) -> bool {
        let mut found = false;
        self.visit_references(&mut |r| {
            if r == Reference::Entity(name) {
                found = true;
            }
        });
        found
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Null => write!(f, "null"),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Number(n) => write!(f, "{n}"),
            Expr::String(s) => write!(f, "{s:?}"),
            Expr::List(items) => write!(f, "[{} items]", items.len()),
            Expr::Map(map) => write!(f, "{{{} keys}}", map.len()),
            Expr::Ref(name) => write!(f, "!Ref {name}"),
            Expr::Pseudo(p) => write!(f, "!Ref {}", p.as_str()),
            Expr::GetAtt { resource, attribute } => write!(f, "!GetAtt {resource}.{attribute}"),
            Expr::Sub(_) => write!(f, "!Sub"),
            Expr::If { condition, .. } => write!(f, "!If {condition}"),
            Expr::Select { .. } => write!(f, "!Select"),
            Expr::Join { .. } => write!(f, "!Join"),
            Expr::Split { .. } => write!(f, "!Split"),
            Expr::FindInMap { map, .. } => write!(f, "!FindInMap {map}"),
            Expr::Base64(_) => write!(f, "!Base64"),
            Expr::ImportValue(_) => write!(f, "!ImportValue"),
            Expr::Equals(..) => write!(f, "!Equals"),
            Expr::And(_) => write!(f, "!And"),
            Expr::Or(_) => write!(f, "!Or"),
            Expr::Not(_) => write!(f, "!Not"),
            Expr::Condition(name) => write!(f, "!Condition {name}"),
            Expr::Opaque { function, .. } => write!(f, "{function}"),
        }
    }
}
