use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::catalog::{self, TypeInfo};
use crate::error::LoadError;
use crate::expr::Expr;
use crate::graph::DependencyGraph;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub type_name: String,
    pub default: Option<Json>,
    pub allowed_values: Vec<Json>,
    pub allowed_pattern: Option<String>,
    pub description: Option<String>,
    pub no_echo: bool,
}

impl Parameter {
    /// `CommaDelimitedList` and `List<...>` parameters resolve to arrays.
    pub fn is_list(&self) -> bool {
        self.type_name == "CommaDelimitedList" || self.type_name.starts_with("List<")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
    RetainExceptOnCreate,
    Snapshot,
}

impl DeletionPolicy {
    /// True when the resource itself outlives the stack. `Snapshot` deletes
    /// the resource and keeps only a backup.
    pub fn retains(&self) -> bool {
        matches!(self, DeletionPolicy::Retain | DeletionPolicy::RetainExceptOnCreate)
    }
}

impl FromStr for DeletionPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Delete" => Ok(Self::Delete),
            "Retain" => Ok(Self::Retain),
            "RetainExceptOnCreate" => Ok(Self::RetainExceptOnCreate),
            "Snapshot" => Ok(Self::Snapshot),
            other => Err(format!("unknown policy '{other}'")),
        }
    }
}

impl fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Delete => "Delete",
            Self::Retain => "Retain",
            Self::RetainExceptOnCreate => "RetainExceptOnCreate",
            Self::Snapshot => "Snapshot",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub logical_id: String,
    pub resource_type: String,
    pub properties: BTreeMap<String, Expr>,
    pub deletion_policy: Option<DeletionPolicy>,
    pub update_replace_policy: Option<DeletionPolicy>,
    pub depends_on: Vec<String>,
    pub condition: Option<String>,
}

/// One entry of a resource's tag set. `key` is `None` when the key itself is
/// computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tag<'a> {
    pub key: Option<&'a str>,
    pub value: &'a Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tags<'a> {
    Absent,
    Entries(Vec<Tag<'a>>),
    /// The tag set is computed (e.g. a conditional or a reference).
    Opaque(&'a Expr),
}

impl<'a> Tags<'a> {
    /// Reads a tag set expression; anything other than a literal list of
    /// `{Key, Value}` maps or a literal map is opaque.
    pub fn parse(raw: &'a Expr) -> Tags<'a> {
        match raw {
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let Expr::Map(m) = item else { return Tags::Opaque(raw) };
                    match (m.get("Key"), m.get("Value")) {
                        (Some(key), Some(value)) => out.push(Tag { key: key.as_str(), value }),
                        _ => return Tags::Opaque(raw),
                    }
                }
                Tags::Entries(out)
            }
            Expr::Map(m) => Tags::Entries(m.iter().map(|(k, v)| Tag { key: Some(k.as_str()), value: v }).collect()),
            other => Tags::Opaque(other),
        }
    }
}

impl Resource {
    pub fn property(&self, name: &str) -> Option<&Expr> {
        self.properties.get(name)
    }

    pub fn type_info(&self) -> TypeInfo {
        catalog::type_info(&self.resource_type)
    }

    /// Reads the tag set in either the `[{Key, Value}]` form or the map form
    /// used by a handful of services.
    pub fn tags(&self) -> Tags<'_> {
        match self.properties.get(self.type_info().tag_property) {
            Some(raw) => Tags::parse(raw),
            None => Tags::Absent,
        }
    }

    /// Names of every entity this resource refers to, `DependsOn` included.
    pub fn referenced_names(&self) -> BTreeSet<&str> {
        let mut names: BTreeSet<&str> = self.depends_on.iter().map(String::as_str).collect();
        for expr in self.properties.values() {
            expr.visit_references(&mut |r| {
                if let crate::expr::Reference::Entity(n) | crate::expr::Reference::Attribute(n) = r {
                    names.insert(n);
                }
            });
        }
        names
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    pub value: Expr,
    pub description: Option<String>,
    pub export_name: Option<Expr>,
    pub condition: Option<String>,
}

/// A loaded template. Immutable once built.
#[derive(Debug, Clone)]
pub struct Template {
    pub format_version: Option<String>,
    pub description: Option<String>,
    pub parameters: BTreeMap<String, Parameter>,
    pub mappings: BTreeMap<String, Json>,
    pub conditions: BTreeMap<String, Expr>,
    pub outputs: BTreeMap<String, Output>,
    resources: Vec<Resource>,
    index: HashMap<String, usize>,
    graph: DependencyGraph,
}

impl Template {
    /// Builds the resource index and dependency graph, rejecting duplicate
    /// logical ids and cycles.
    pub fn new(
        format_version: Option<String>,
        description: Option<String>,
        parameters: BTreeMap<String, Parameter>,
        mappings: BTreeMap<String, Json>,
        conditions: BTreeMap<String, Expr>,
        resources: Vec<Resource>,
        outputs: BTreeMap<String, Output>,
    ) -> Result<Self, LoadError> {
        let mut index = HashMap::with_capacity(resources.len());
        for (i, r) in resources.iter().enumerate() {
            if index.insert(r.logical_id.clone(), i).is_some() {
                return Err(LoadError::schema(
                    format!("Resources.{}", r.logical_id),
                    "duplicate logical id",
                ));
            }
            if parameters.contains_key(&r.logical_id) {
                return Err(LoadError::schema(
                    format!("Resources.{}", r.logical_id),
                    "logical id collides with a parameter",
                ));
            }
        }
        let graph = DependencyGraph::build(&resources, &index)?;
        Ok(Self { format_version, description, parameters, mappings, conditions, outputs, resources, index, graph })
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.index.get(logical_id).map(|&i| &self.resources[i])
    }

    pub fn position(&self, logical_id: &str) -> Option<usize> {
        self.index.get(logical_id).copied()
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }

    /// True if `name` is a declared parameter or resource.
    pub fn declares(&self, name: &str) -> bool {
        self.parameters.contains_key(name) || self.index.contains_key(name)
    }

    /// Resources `logical_id` depends on, sorted by name.
    pub fn dependencies(&self, logical_id: &str) -> Vec<&str> {
        self.position(logical_id)
            .map(|i| self.graph.dependencies(i).map(|j| self.resources[j].logical_id.as_str()).collect())
            .unwrap_or_default()
    }

    /// Resources that depend on `logical_id`, sorted by name.
    pub fn dependents(&self, logical_id: &str) -> Vec<&str> {
        self.position(logical_id)
            .map(|i| self.graph.dependents(i).map(|j| self.resources[j].logical_id.as_str()).collect())
            .unwrap_or_default()
    }

    /// An order in which every resource comes after its dependencies.
    pub fn creation_order(&self) -> Vec<&str> {
        self.graph.order().iter().map(|&i| self.resources[i].logical_id.as_str()).collect()
    }

    /// Derives a new template with rewritten resources. Returning `None` drops
    /// the resource.
    pub fn map_resources<F>(&self, mut f: F) -> Result<Template, LoadError>
    where
        F: FnMut(&Resource) -> Option<Resource>,
    {
        let resources = self.resources.iter().filter_map(&mut f).collect();
        Template::new(
            self.format_version.clone(),
            self.description.clone(),
            self.parameters.clone(),
            self.mappings.clone(),
            self.conditions.clone(),
            resources,
            self.outputs.clone(),
        )
    }
}

/// Equality ignores resource declaration order.
impl PartialEq for Template {
    fn eq(&self, other: &Self) -> bool {
        fn canon(t: &Template) -> BTreeMap<&str, &Resource> {
            t.resources.iter().map(|r| (r.logical_id.as_str(), r)).collect()
        }
        self.format_version == other.format_version
            && self.description == other.description
            && self.parameters == other.parameters
            && self.mappings == other.mappings
            && self.conditions == other.conditions
            && self.outputs == other.outputs
            && canon(self) == canon(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_yaml;

    #[test]
    fn only_retain_policies_keep_the_resource() {
        let retaining: Vec<_> = ["Delete", "Retain", "RetainExceptOnCreate", "Snapshot"]
            .into_iter()
            .filter(|p| p.parse::<DeletionPolicy>().unwrap().retains())
            .collect();
        assert_eq!(retaining, ["Retain", "RetainExceptOnCreate"]);
        assert!("RetainExceptOnDelete".parse::<DeletionPolicy>().is_err());
    }

    #[test]
    fn equality_ignores_declaration_order() {
        let a = load_yaml("Resources:\n  A: { Type: AWS::SNS::Topic }\n  B: { Type: AWS::SQS::Queue }\n").unwrap();
        let b = load_yaml("Resources:\n  B: { Type: AWS::SQS::Queue }\n  A: { Type: AWS::SNS::Topic }\n").unwrap();
        assert_eq!(a, b);
        let c = load_yaml("Resources:\n  A: { Type: AWS::SNS::Topic }\n").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn conditional_tags_are_opaque() {
        let t = load_yaml(
            r#"
Conditions:
  Enabled: !Equals [a, a]
Resources:
  T:
    Type: AWS::SNS::Topic
    Properties:
      Tags: !If [Enabled, [], []]
"#,
        )
        .unwrap();
        assert!(matches!(t.resource("T").unwrap().tags(), Tags::Opaque(_)));
    }
}
