use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map as JsonMap, Number, Value as Json};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::error::LoadError;
use crate::expr::{Expr, PseudoParameter, SubPart};
use crate::template::{DeletionPolicy, Output, Parameter, Resource, Template};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{(!?)([^}]*)\}").expect("placeholder pattern is valid"));

/// Parses JSON or YAML; a document whose first non-blank character is `{` is
/// treated as JSON.
pub fn load(text: &str) -> Result<Template, LoadError> {
    if text.trim_start().starts_with('{') {
        load_json(text)
    } else {
        load_yaml(text)
    }
}

pub fn load_json(text: &str) -> Result<Template, LoadError> {
    let doc: Json = serde_json::from_str(text).map_err(|e| LoadError::MalformedDocument(e.to_string()))?;
    from_value(&doc)
}

pub fn load_yaml(text: &str) -> Result<Template, LoadError> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| LoadError::MalformedDocument(e.to_string()))?;
    from_value(&yaml_to_json(doc)?)
}

pub fn load_path(path: &Path) -> Result<Template, LoadError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| LoadError::Io { path: path.display().to_string(), source })?;
    debug!(path = %path.display(), bytes = text.len(), "loading template");
    load(&text)
}

/// Builds a template from an already parsed document.
pub fn from_value(doc: &Json) -> Result<Template, LoadError> {
    let root = doc.as_object().ok_or_else(|| LoadError::schema("$", "document root must be a map"))?;

    let format_version = optional_string(root, "AWSTemplateFormatVersion", "$")?;
    let description = optional_string(root, "Description", "$")?;
    let parameters = section(root, "Parameters")?
        .map(|m| {
            m.iter()
                .map(|(k, v)| parameter(k, v).map(|p| (k.clone(), p)))
                .collect::<Result<BTreeMap<_, _>, _>>()
        })
        .transpose()?
        .unwrap_or_default();
    let mappings = section(root, "Mappings")?.map(mappings).transpose()?.unwrap_or_default();
    let conditions = section(root, "Conditions")?
        .map(|m| {
            m.iter()
                .map(|(k, v)| lift(v, &format!("Conditions.{k}"), true).map(|e| (k.clone(), e)))
                .collect::<Result<BTreeMap<_, _>, _>>()
        })
        .transpose()?
        .unwrap_or_default();
    let resources = section(root, "Resources")?
        .ok_or_else(|| LoadError::schema("Resources", "missing required section"))?
        .iter()
        .map(|(k, v)| resource(k, v))
        .collect::<Result<Vec<_>, _>>()?;
    let outputs = section(root, "Outputs")?
        .map(|m| {
            m.iter()
                .map(|(k, v)| output(k, v).map(|o| (k.clone(), o)))
                .collect::<Result<BTreeMap<_, _>, _>>()
        })
        .transpose()?
        .unwrap_or_default();

    debug!(resources = resources.len(), parameters = parameters.len(), "template parsed");
    Template::new(format_version, description, parameters, mappings, conditions, resources, outputs)
}

fn section<'a>(root: &'a JsonMap<String, Json>, key: &str) -> Result<Option<&'a JsonMap<String, Json>>, LoadError> {
    match root.get(key) {
        None => Ok(None),
        Some(Json::Object(m)) => Ok(Some(m)),
        Some(_) => Err(LoadError::schema(key, "section must be a map")),
    }
}

fn optional_string(obj: &JsonMap<String, Json>, key: &str, at: &str) -> Result<Option<String>, LoadError> {
    match obj.get(key) {
        None => Ok(None),
        Some(Json::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(LoadError::schema(format!("{at}.{key}"), "expected a string")),
    }
}

fn parameter(name: &str, v: &Json) -> Result<Parameter, LoadError> {
    let at = format!("Parameters.{name}");
    let obj = v.as_object().ok_or_else(|| LoadError::schema(&at, "parameter must be a map"))?;
    let type_name =
        optional_string(obj, "Type", &at)?.ok_or_else(|| LoadError::schema(&at, "parameter lacks a Type"))?;
    let allowed_values = match obj.get("AllowedValues") {
        None => Vec::new(),
        Some(Json::Array(items)) => items.clone(),
        Some(_) => return Err(LoadError::schema(format!("{at}.AllowedValues"), "expected a list")),
    };
    let allowed_pattern = optional_string(obj, "AllowedPattern", &at)?;
    if let Some(p) = &allowed_pattern {
        Regex::new(p).map_err(|e| LoadError::schema(format!("{at}.AllowedPattern"), e.to_string()))?;
    }
    let no_echo = match obj.get("NoEcho") {
        Some(Json::Bool(b)) => *b,
        Some(Json::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };
    Ok(Parameter {
        name: name.to_string(),
        type_name,
        default: obj.get("Default").cloned(),
        allowed_values,
        allowed_pattern,
        description: optional_string(obj, "Description", &at)?,
        no_echo,
    })
}

fn mappings(m: &JsonMap<String, Json>) -> Result<BTreeMap<String, Json>, LoadError> {
    let mut out = BTreeMap::new();
    for (name, table) in m {
        let rows = table
            .as_object()
            .ok_or_else(|| LoadError::schema(format!("Mappings.{name}"), "mapping must be a map"))?;
        if let Some((key, _)) = rows.iter().find(|(_, row)| !row.is_object()) {
            return Err(LoadError::schema(format!("Mappings.{name}.{key}"), "mapping entry must be a map"));
        }
        out.insert(name.clone(), table.clone());
    }
    Ok(out)
}

fn resource(name: &str, v: &Json) -> Result<Resource, LoadError> {
    let at = format!("Resources.{name}");
    let obj = v.as_object().ok_or_else(|| LoadError::schema(&at, "resource must be a map"))?;
    let resource_type =
        optional_string(obj, "Type", &at)?.ok_or_else(|| LoadError::schema(&at, "resource lacks a Type"))?;
    let properties = match obj.get("Properties") {
        None => BTreeMap::new(),
        Some(Json::Object(props)) => props
            .iter()
            .map(|(k, v)| lift(v, &format!("{at}.Properties.{k}"), false).map(|e| (k.clone(), e)))
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(LoadError::schema(format!("{at}.Properties"), "properties must be a map")),
    };
    let policy = |key: &str| -> Result<Option<DeletionPolicy>, LoadError> {
        optional_string(obj, key, &at)?
            .map(|s| s.parse().map_err(|e: String| LoadError::schema(format!("{at}.{key}"), e)))
            .transpose()
    };
    let depends_on = match obj.get("DependsOn") {
        None => Vec::new(),
        Some(Json::String(s)) => vec![s.clone()],
        Some(Json::Array(items)) => items
            .iter()
            .map(|i| {
                i.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| LoadError::schema(format!("{at}.DependsOn"), "expected logical ids"))
            })
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(LoadError::schema(format!("{at}.DependsOn"), "expected a string or list")),
    };
    Ok(Resource {
        logical_id: name.to_string(),
        resource_type,
        properties,
        deletion_policy: policy("DeletionPolicy")?,
        update_replace_policy: policy("UpdateReplacePolicy")?,
        depends_on,
        condition: optional_string(obj, "Condition", &at)?,
    })
}

fn output(name: &str, v: &Json) -> Result<Output, LoadError> {
    let at = format!("Outputs.{name}");
    let obj = v.as_object().ok_or_else(|| LoadError::schema(&at, "output must be a map"))?;
    let value = obj.get("Value").ok_or_else(|| LoadError::schema(&at, "output lacks a Value"))?;
    let export_name = match obj.get("Export") {
        None => None,
        Some(Json::Object(e)) => e.get("Name").map(|n| lift(n, &format!("{at}.Export.Name"), false)).transpose()?,
        Some(_) => return Err(LoadError::schema(format!("{at}.Export"), "export must be a map")),
    };
    Ok(Output {
        name: name.to_string(),
        value: lift(value, &format!("{at}.Value"), false)?,
        description: optional_string(obj, "Description", &at)?,
        export_name,
        condition: optional_string(obj, "Condition", &at)?,
    })
}

/// Turns a property value into an expression, lifting single-key intrinsic
/// maps. `{"Condition": name}` is only an intrinsic inside condition functions.
fn lift(v: &Json, at: &str, in_condition: bool) -> Result<Expr, LoadError> {
    Ok(match v {
        Json::Null => Expr::Null,
        Json::Bool(b) => Expr::Bool(*b),
        Json::Number(n) => Expr::Number(n.clone()),
        Json::String(s) => Expr::String(s.clone()),
        Json::Array(items) => Expr::List(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| lift(item, &format!("{at}[{i}]"), in_condition))
                .collect::<Result<_, _>>()?,
        ),
        Json::Object(map) => {
            if let Some((key, arg)) = map.iter().next().filter(|_| map.len() == 1) {
                if key == "Ref" {
                    return reference(arg, at);
                }
                if key.starts_with("Fn::") {
                    return intrinsic(key, arg, &format!("{at}.{key}"));
                }
                if key == "Condition" && in_condition {
                    let name = arg.as_str().ok_or_else(|| LoadError::schema(at, "Condition expects a name"))?;
                    return Ok(Expr::Condition(name.to_string()));
                }
            }
            Expr::Map(
                map.iter()
                    .map(|(k, item)| lift(item, &format!("{at}.{k}"), false).map(|e| (k.clone(), e)))
                    .collect::<Result<_, _>>()?,
            )
        }
    })
}

fn reference(arg: &Json, at: &str) -> Result<Expr, LoadError> {
    let name = arg.as_str().ok_or_else(|| LoadError::schema(at, "Ref expects a logical name"))?;
    named(name, at)
}

fn named(name: &str, at: &str) -> Result<Expr, LoadError> {
    if name.starts_with("AWS::") {
        PseudoParameter::from_ref(name)
            .map(Expr::Pseudo)
            .ok_or_else(|| LoadError::schema(at, format!("unknown pseudo parameter '{name}'")))
    } else {
        Ok(Expr::Ref(name.to_string()))
    }
}

fn args<'a>(arg: &'a Json, at: &str, n: usize) -> Result<&'a [Json], LoadError> {
    match arg {
        Json::Array(items) if items.len() == n => Ok(items),
        _ => Err(LoadError::schema(at, format!("expected a list of {n} arguments"))),
    }
}

fn string_arg<'a>(v: &'a Json, at: &str) -> Result<&'a str, LoadError> {
    v.as_str().ok_or_else(|| LoadError::schema(at, "expected a string argument"))
}

fn boxed(v: &Json, at: &str, in_condition: bool) -> Result<Box<Expr>, LoadError> {
    lift(v, at, in_condition).map(Box::new)
}

fn intrinsic(function: &str, arg: &Json, at: &str) -> Result<Expr, LoadError> {
    Ok(match function {
        "Fn::GetAtt" => {
            let (resource, attribute) = match arg {
                Json::String(s) => s
                    .split_once('.')
                    .ok_or_else(|| LoadError::schema(at, "expected 'Resource.Attribute'"))?,
                _ => {
                    let a = args(arg, at, 2)?;
                    (string_arg(&a[0], at)?, string_arg(&a[1], at)?)
                }
            };
            Expr::GetAtt { resource: resource.to_string(), attribute: attribute.to_string() }
        }
        "Fn::Sub" => match arg {
            Json::String(s) => Expr::Sub(substitution(s, &BTreeMap::new(), at)?),
            _ => {
                let a = args(arg, at, 2)?;
                let vars = a[1]
                    .as_object()
                    .ok_or_else(|| LoadError::schema(at, "substitution variables must be a map"))?
                    .iter()
                    .map(|(k, v)| lift(v, &format!("{at}.{k}"), false).map(|e| (k.clone(), e)))
                    .collect::<Result<BTreeMap<_, _>, _>>()?;
                Expr::Sub(substitution(string_arg(&a[0], at)?, &vars, at)?)
            }
        },
        "Fn::If" => {
            let a = args(arg, at, 3)?;
            Expr::If {
                condition: string_arg(&a[0], at)?.to_string(),
                then: boxed(&a[1], at, false)?,
                otherwise: boxed(&a[2], at, false)?,
            }
        }
        "Fn::Select" => {
            let a = args(arg, at, 2)?;
            Expr::Select { index: boxed(&a[0], at, false)?, list: boxed(&a[1], at, false)? }
        }
        "Fn::GetAZs" => Expr::Pseudo(PseudoParameter::AvailabilityZones),
        "Fn::Join" => {
            let a = args(arg, at, 2)?;
            Expr::Join { delimiter: string_arg(&a[0], at)?.to_string(), items: boxed(&a[1], at, false)? }
        }
        "Fn::Split" => {
            let a = args(arg, at, 2)?;
            Expr::Split { delimiter: string_arg(&a[0], at)?.to_string(), source: boxed(&a[1], at, false)? }
        }
        "Fn::FindInMap" => {
            let a = args(arg, at, 3)?;
            Expr::FindInMap {
                map: string_arg(&a[0], at)?.to_string(),
                top: boxed(&a[1], at, false)?,
                second: boxed(&a[2], at, false)?,
            }
        }
        "Fn::Base64" => Expr::Base64(boxed(arg, at, false)?),
        "Fn::ImportValue" => Expr::ImportValue(boxed(arg, at, false)?),
        "Fn::Equals" => {
            let a = args(arg, at, 2)?;
            Expr::Equals(boxed(&a[0], at, false)?, boxed(&a[1], at, false)?)
        }
        "Fn::And" | "Fn::Or" => {
            let items = match arg {
                Json::Array(items) if (2..=10).contains(&items.len()) => items,
                _ => return Err(LoadError::schema(at, "expected between 2 and 10 conditions")),
            };
            let items = items.iter().map(|i| lift(i, at, true)).collect::<Result<Vec<_>, _>>()?;
            if function == "Fn::And" {
                Expr::And(items)
            } else {
                Expr::Or(items)
            }
        }
        "Fn::Not" => {
            let a = args(arg, at, 1)?;
            Expr::Not(boxed(&a[0], at, true)?)
        }
        other => Expr::Opaque { function: other.to_string(), args: boxed(arg, at, false)? },
    })
}

fn substitution(s: &str, vars: &BTreeMap<String, Expr>, at: &str) -> Result<Vec<SubPart>, LoadError> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut last = 0;
    for cap in PLACEHOLDER.captures_iter(s) {
        let Some(whole) = cap.get(0) else { continue };
        text.push_str(&s[last..whole.start()]);
        last = whole.end();
        let name = cap[2].trim();
        if !cap[1].is_empty() {
            text.push_str("${");
            text.push_str(&cap[2]);
            text.push('}');
            continue;
        }
        if name.is_empty() {
            return Err(LoadError::schema(at, "empty substitution placeholder"));
        }
        let expr = match vars.get(name) {
            Some(e) => e.clone(),
            None => match name.split_once('.') {
                Some((resource, attribute)) if !name.starts_with("AWS::") => {
                    Expr::GetAtt { resource: resource.to_string(), attribute: attribute.to_string() }
                }
                _ => named(name, at)?,
            },
        };
        if !text.is_empty() {
            parts.push(SubPart::Text(std::mem::take(&mut text)));
        }
        parts.push(SubPart::Placeholder(expr));
    }
    text.push_str(&s[last..]);
    if !text.is_empty() {
        parts.push(SubPart::Text(text));
    }
    Ok(parts)
}

/// Converts YAML to JSON, expanding CloudFormation short-form tags
/// (`!Ref`, `!Sub`, `!GetAtt`, ...) into their long form.
fn yaml_to_json(v: serde_yaml::Value) -> Result<Json, LoadError> {
    use serde_yaml::Value as Yaml;
    Ok(match v {
        Yaml::Null => Json::Null,
        Yaml::Bool(b) => Json::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Json::from(i)
            } else if let Some(u) = n.as_u64() {
                Json::from(u)
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                Json::Number(
                    Number::from_f64(f)
                        .ok_or_else(|| LoadError::MalformedDocument(format!("non-finite number {n}")))?,
                )
            }
        }
        Yaml::String(s) => Json::String(s),
        Yaml::Sequence(items) => Json::Array(items.into_iter().map(yaml_to_json).collect::<Result<_, _>>()?),
        Yaml::Mapping(map) => {
            let mut out = JsonMap::with_capacity(map.len());
            for (k, v) in map {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    other => return Err(LoadError::MalformedDocument(format!("unsupported mapping key {other:?}"))),
                };
                out.insert(key, yaml_to_json(v)?);
            }
            Json::Object(out)
        }
        Yaml::Tagged(tagged) => {
            let serde_yaml::value::TaggedValue { tag, value } = *tagged;
            let tag = tag.to_string();
            let name = tag.trim_start_matches('!');
            let key = match name {
                "Ref" | "Condition" => name.to_string(),
                _ => format!("Fn::{name}"),
            };
            let mut out = JsonMap::with_capacity(1);
            out.insert(key, yaml_to_json(value)?);
            Json::Object(out)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(resources: Json) -> String {
        json!({ "AWSTemplateFormatVersion": "2010-09-09", "Resources": resources }).to_string()
    }

    #[test]
    fn lifts_intrinsics_in_properties() {
        let t = load_json(&json!({
            "Parameters": { "EnvironmentSuffix": { "Type": "String", "Default": "dev" } },
            "Resources": {
                "Key": { "Type": "AWS::KMS::Key" },
                "Bucket": {
                    "Type": "AWS::S3::Bucket",
                    "Properties": {
                        "BucketName": { "Fn::Sub": "data-${EnvironmentSuffix}-${AWS::AccountId}" },
                        "KeyArn": { "Fn::GetAtt": ["Key", "Arn"] },
                        "Zone": { "Fn::Select": [0, { "Fn::GetAZs": "" }] },
                        "Plain": { "Nested": { "Ref": "EnvironmentSuffix" } }
                    }
                }
            }
        }).to_string())
        .unwrap();

        let bucket = t.resource("Bucket").unwrap();
        assert_eq!(
            bucket.property("BucketName"),
            Some(&Expr::Sub(vec![
                SubPart::Text("data-".into()),
                SubPart::Placeholder(Expr::Ref("EnvironmentSuffix".into())),
                SubPart::Text("-".into()),
                SubPart::Placeholder(Expr::Pseudo(PseudoParameter::AccountId)),
            ]))
        );
        assert_eq!(
            bucket.property("KeyArn"),
            Some(&Expr::GetAtt { resource: "Key".into(), attribute: "Arn".into() })
        );
        assert!(matches!(bucket.property("Zone"), Some(Expr::Select { .. })));
        let plain = bucket.property("Plain").and_then(Expr::as_map).unwrap();
        assert_eq!(plain.get("Nested"), Some(&Expr::Ref("EnvironmentSuffix".into())));
        assert_eq!(t.dependencies("Bucket"), vec!["Key"]);
        assert_eq!(t.dependents("Key"), vec!["Bucket"]);
        assert_eq!(t.creation_order(), vec!["Key", "Bucket"]);
    }

    #[test]
    fn sub_escapes_and_variable_maps() {
        let t = load_json(&doc(json!({
            "Fn": { "Type": "AWS::Lambda::Function", "Properties": {
                "Code": { "Fn::Sub": ["${!Literal}-${Name}", { "Name": { "Ref": "AWS::Region" } }] }
            }}
        })))
        .unwrap();
        assert_eq!(
            t.resource("Fn").unwrap().property("Code"),
            Some(&Expr::Sub(vec![
                SubPart::Text("${Literal}-".into()),
                SubPart::Placeholder(Expr::Pseudo(PseudoParameter::Region)),
            ]))
        );
    }

    #[test]
    fn missing_resources_is_a_schema_error() {
        let err = load_json(r#"{"AWSTemplateFormatVersion": "2010-09-09"}"#).unwrap_err();
        assert!(matches!(err, LoadError::Schema { ref path, .. } if path == "Resources"));
    }

    #[test]
    fn resource_without_type_is_a_schema_error() {
        let err = load_json(&doc(json!({ "Bucket": { "Properties": {} } }))).unwrap_err();
        assert!(matches!(err, LoadError::Schema { ref path, .. } if path == "Resources.Bucket"));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(load_json("{ not json").unwrap_err().is_malformed());
        assert!(load("Resources: [unclosed").unwrap_err().is_malformed());
    }

    #[test]
    fn bad_intrinsic_arguments_are_rejected() {
        let err = load_json(&doc(json!({
            "Bucket": { "Type": "AWS::S3::Bucket", "Properties": { "X": { "Fn::If": ["OnlyTwo", 1] } } }
        })))
        .unwrap_err();
        assert!(matches!(err, LoadError::Schema { .. }));
        let err = load_json(&doc(json!({
            "Bucket": { "Type": "AWS::S3::Bucket", "Properties": { "X": { "Ref": "AWS::Nope" } } }
        })))
        .unwrap_err();
        assert!(err.to_string().contains("AWS::Nope"));
    }

    #[test]
    fn unknown_deletion_policy_is_rejected() {
        let err = load_json(&doc(json!({ "Bucket": { "Type": "AWS::S3::Bucket", "DeletionPolicy": "Keep" } })))
            .unwrap_err();
        assert!(matches!(err, LoadError::Schema { ref path, .. } if path == "Resources.Bucket.DeletionPolicy"));
    }

    #[test]
    fn mutual_references_are_a_cycle() {
        let err = load_json(&doc(json!({
            "A": { "Type": "AWS::SNS::Topic", "Properties": { "TopicName": { "Fn::GetAtt": ["B", "Name"] } } },
            "B": { "Type": "AWS::SNS::Topic", "Properties": { "TopicName": { "Fn::Sub": "${A}" } } }
        })))
        .unwrap_err();
        match err {
            LoadError::CircularDependency(names) => assert_eq!(names, vec!["A", "B", "A"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn transitive_and_depends_on_cycles_are_rejected() {
        let err = load_json(&doc(json!({
            "A": { "Type": "AWS::SNS::Topic", "DependsOn": "C" },
            "B": { "Type": "AWS::SNS::Topic", "DependsOn": ["A"] },
            "C": { "Type": "AWS::SNS::Topic", "Properties": { "Topic": { "Ref": "B" } } }
        })))
        .unwrap_err();
        assert!(matches!(err, LoadError::CircularDependency(ref n) if n.len() == 4));

        let err = load_json(&doc(json!({
            "A": { "Type": "AWS::SNS::Topic", "Properties": { "Self": { "Ref": "A" } } }
        })))
        .unwrap_err();
        assert!(matches!(err, LoadError::CircularDependency(_)));
    }

    #[test]
    fn dangling_references_load_fine() {
        let t = load_json(&doc(json!({
            "A": { "Type": "AWS::SNS::Topic", "Properties": { "TopicName": { "Ref": "Missing" } } }
        })))
        .unwrap();
        assert!(t.dependencies("A").is_empty());
    }

    #[test]
    fn yaml_short_form_tags_expand() {
        let yaml = r#"
Parameters:
  EnvironmentSuffix:
    Type: String
Conditions:
  IsProd: !Equals [!Ref EnvironmentSuffix, prod]
Resources:
  Key:
    Type: AWS::KMS::Key
  Bucket:
    Type: AWS::S3::Bucket
    DeletionPolicy: Retain
    Properties:
      BucketName: !Sub "logs-${EnvironmentSuffix}"
      KeyArn: !GetAtt Key.Arn
      Versioning: !If [IsProd, Enabled, !Ref "AWS::NoValue"]
"#;
        let t = load(yaml).unwrap();
        let bucket = t.resource("Bucket").unwrap();
        assert_eq!(
            bucket.property("KeyArn"),
            Some(&Expr::GetAtt { resource: "Key".into(), attribute: "Arn".into() })
        );
        assert!(matches!(bucket.property("Versioning"), Some(Expr::If { condition, .. }) if condition == "IsProd"));
        assert!(matches!(t.conditions.get("IsProd"), Some(Expr::Equals(..))));
        assert_eq!(bucket.deletion_policy, Some(crate::DeletionPolicy::Retain));
    }

    #[test]
    fn condition_key_is_only_lifted_inside_condition_functions() {
        let t = load_json(&json!({
            "Conditions": {
                "A": { "Fn::Equals": ["x", "x"] },
                "B": { "Fn::Not": [{ "Condition": "A" }] }
            },
            "Resources": {
                "Policy": { "Type": "AWS::IAM::Policy", "Properties": { "Statement": { "Condition": "A" } } }
            }
        }).to_string())
        .unwrap();
        assert_eq!(t.conditions.get("B"), Some(&Expr::Not(Box::new(Expr::Condition("A".into())))));
        let stmt = t.resource("Policy").unwrap().property("Statement").and_then(Expr::as_map).unwrap();
        assert_eq!(stmt.get("Condition"), Some(&Expr::String("A".into())));
    }

    #[test]
    fn equality_ignores_key_order() {
        let a = r#"{"Resources": {"A": {"Type": "AWS::SNS::Topic"},
            "B": {"Type": "AWS::SQS::Queue", "Properties": {"x": 1, "y": 2}}}}"#;
        let b = r#"{"Resources": {"B": {"Properties": {"y": 2, "x": 1}, "Type": "AWS::SQS::Queue"},
            "A": {"Type": "AWS::SNS::Topic"}}}"#;
        assert_eq!(load_json(a).unwrap(), load_json(b).unwrap());
        assert_eq!(load_json(a).unwrap().resources()[0].logical_id, "A");
        assert_eq!(load_json(b).unwrap().resources()[0].logical_id, "B");
    }
}
