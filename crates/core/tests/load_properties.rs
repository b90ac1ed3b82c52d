//! Loading is deterministic and insensitive to key order and document syntax.

use proptest::prelude::*;
use serde_json::{json, Map, Value as Json};
use stackcheck_core::{load_json, load_yaml, Template};

const TYPES: [&str; 4] = ["AWS::S3::Bucket", "AWS::SQS::Queue", "AWS::SNS::Topic", "AWS::DynamoDB::Table"];

fn property() -> impl Strategy<Value = Json> {
    prop_oneof![
        any::<bool>().prop_map(Json::from),
        (0u32..1000).prop_map(Json::from),
        "[a-z]{1,8}".prop_map(Json::from),
        Just(json!({ "Ref": "Stage" })),
        Just(json!({ "Fn::Sub": "x-${Stage}-${AWS::Region}" })),
        Just(json!({ "Fn::If": ["IsProd", "a", { "Ref": "AWS::NoValue" }] })),
    ]
}

/// Resources where each may depend on earlier ones only, so no cycles.
fn resources() -> impl Strategy<Value = Vec<(String, Json)>> {
    prop::collection::vec(
        (
            0..TYPES.len(),
            prop::collection::btree_map("[A-Z][a-z]{1,6}", property(), 0..4),
            any::<prop::sample::Index>(),
        ),
        1..10,
    )
    .prop_map(|items| {
        let mut out: Vec<(String, Json)> = Vec::new();
        for (i, (ty, props, dep)) in items.into_iter().enumerate() {
            let mut body = json!({ "Type": TYPES[ty], "Properties": props });
            if i > 0 {
                body["DependsOn"] = Json::from(out[dep.index(i)].0.clone());
            }
            out.push((format!("Res{i}"), body));
        }
        out
    })
}

fn document(resources: &[(String, Json)], reversed: bool) -> Json {
    let mut map = Map::new();
    let ordered: Box<dyn Iterator<Item = &(String, Json)>> =
        if reversed { Box::new(resources.iter().rev()) } else { Box::new(resources.iter()) };
    for (name, body) in ordered {
        map.insert(name.clone(), body.clone());
    }
    json!({
        "Parameters": { "Stage": { "Type": "String", "Default": "dev" } },
        "Conditions": { "IsProd": { "Fn::Equals": [{ "Ref": "Stage" }, "prod"] } },
        "Resources": map
    })
}

fn load(doc: &Json) -> Template {
    load_json(&doc.to_string()).unwrap()
}

proptest! {
    #[test]
    fn loading_twice_gives_equal_templates(rs in resources()) {
        let doc = document(&rs, false);
        prop_assert_eq!(load(&doc), load(&doc));
    }

    #[test]
    fn resource_order_does_not_affect_equality(rs in resources()) {
        let forward = load(&document(&rs, false));
        let backward = load(&document(&rs, true));
        prop_assert_eq!(&forward, &backward);
        // Declaration order itself is preserved.
        let names: Vec<_> = backward.resources().iter().map(|r| r.logical_id.clone()).collect();
        let expected: Vec<_> = rs.iter().rev().map(|(n, _)| n.clone()).collect();
        prop_assert_eq!(names, expected);
    }

    #[test]
    fn yaml_and_json_agree(rs in resources()) {
        let doc = document(&rs, false);
        let yaml = serde_yaml::to_string(&doc).unwrap();
        prop_assert_eq!(load_yaml(&yaml).unwrap(), load(&doc));
    }

    #[test]
    fn creation_order_respects_dependencies(rs in resources()) {
        let t = load(&document(&rs, true));
        let order = t.creation_order();
        for r in t.resources() {
            let at = order.iter().position(|n| *n == r.logical_id).unwrap();
            for dep in t.dependencies(&r.logical_id) {
                prop_assert!(order.iter().position(|n| *n == dep).unwrap() < at);
            }
        }
    }
}
