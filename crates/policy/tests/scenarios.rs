use serde_json::json;
use stackcheck_core::{load, load_yaml, LoadError};
use stackcheck_policy::{aggregate, evaluate, rules, Report, RuleSet, Severity, Status, BROKEN_REFERENCE, OUTPUT};

fn only(ids: &[&str]) -> RuleSet {
    let mut set = RuleSet::new();
    for id in ids {
        set.register(rules::build(id, serde_json::Value::Null).unwrap());
    }
    set
}

#[test]
fn unencrypted_bucket_missing_environment_tag() {
    let template = load(
        &json!({
            "Resources": {
                "Logs": { "Type": "AWS::S3::Bucket", "Properties": {
                    "Tags": [{ "Key": "Project", "Value": "atlas" }]
                }}
            }
        })
        .to_string(),
    )
    .unwrap();
    let report = aggregate(evaluate(&template, &only(&["encryption-at-rest", "mandatory-tags"])));

    assert_eq!(report.findings.len(), 2);
    let encryption: Vec<_> = report.findings.iter().filter(|f| f.rule == "encryption-at-rest").collect();
    let tags: Vec<_> = report.findings.iter().filter(|f| f.rule == "mandatory-tags").collect();
    assert_eq!(encryption.len(), 1);
    assert_eq!(encryption[0].severity, Severity::High);
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].severity, Severity::Low);
    assert!(tags[0].message.contains("Environment"));
    assert!(!report.passed);
}

#[test]
fn wildcard_statement_is_one_critical_finding() {
    let template = load_yaml(
        r#"
Resources:
  Admin:
    Type: AWS::IAM::ManagedPolicy
    Properties:
      PolicyDocument:
        Version: "2012-10-17"
        Statement:
          - Effect: Allow
            Action: ["*"]
            Resource: ["*"]
"#,
    )
    .unwrap();
    let findings = evaluate(&template, &RuleSet::builtin().unwrap());
    assert_eq!(findings.len(), 1, "{findings:?}");
    assert_eq!(findings[0].rule, "iam-least-privilege");
    assert_eq!(findings[0].severity, Severity::Critical);
}

#[test]
fn literal_names_versus_suffixed_names() {
    let rules = only(&["parameterized-naming"]);
    let literal = load_yaml(
        r#"
Resources:
  Data:
    Type: AWS::S3::Bucket
    Properties:
      BucketName: mybucket
"#,
    )
    .unwrap();
    let findings = evaluate(&literal, &rules);
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].severity, Severity::Medium);

    let suffixed = load_yaml(
        r#"
Parameters:
  EnvironmentSuffix:
    Type: String
Resources:
  Data:
    Type: AWS::S3::Bucket
    Properties:
      BucketName: !Sub "mybucket-${EnvironmentSuffix}"
"#,
    )
    .unwrap();
    assert!(evaluate(&suffixed, &rules).is_empty());
}

#[test]
fn ssh_open_to_the_world() {
    let rules = only(&["network-exposure"]);
    let group = |cidr: &str| {
        load(
            &json!({ "Resources": { "Web": { "Type": "AWS::EC2::SecurityGroup", "Properties": {
                "GroupDescription": "web",
                "SecurityGroupIngress": [{ "IpProtocol": "tcp", "FromPort": 22, "ToPort": 22, "CidrIp": cidr }]
            }}}})
            .to_string(),
        )
        .unwrap()
    };
    let findings = evaluate(&group("0.0.0.0/0"), &rules);
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].severity, Severity::Critical);
    assert_eq!(findings[0].rule, "network-exposure");

    assert!(evaluate(&group("203.0.113.0/24"), &rules).is_empty());
}

#[test]
fn missing_resources_section_is_a_schema_error() {
    let err = load_yaml("AWSTemplateFormatVersion: '2010-09-09'\nDescription: nothing\n").unwrap_err();
    assert!(matches!(err, LoadError::Schema { .. }));
    let report = Report::load_failure("empty.yaml", &err, Severity::High);
    assert_eq!(report.status, Status::SchemaError);
    assert!(report.findings.is_empty());
    assert!(!report.passed);
    assert_eq!(report.exit_code(), 2);
}

#[test]
fn cycles_are_rejected_before_evaluation() {
    let err = load(
        &json!({ "Resources": {
            "A": { "Type": "AWS::SNS::Topic", "DependsOn": "B" },
            "B": { "Type": "AWS::SNS::Topic", "Properties": { "TopicName": { "Ref": "A" } } }
        }})
        .to_string(),
    )
    .unwrap_err();
    assert!(matches!(err, LoadError::CircularDependency(_)));
    assert_eq!(Report::load_failure("cycle.json", &err, Severity::High).status, Status::SchemaError);
}

#[test]
fn dangling_output_reference_fails_a_clean_stack() {
    let template = load_yaml(
        r#"
Resources:
  Topic:
    Type: AWS::SNS::Topic
    Properties:
      KmsMasterKeyId: alias/aws/sns
      Tags:
        - { Key: Environment, Value: dev }
        - { Key: Project, Value: atlas }
Outputs:
  Arn:
    Value: !GetAtt Ghost.Arn
"#,
    )
    .unwrap();
    let report = aggregate(evaluate(&template, &RuleSet::builtin().unwrap()));
    assert_eq!(report.findings.len(), 1, "{:?}", report.findings);
    let finding = &report.findings[0];
    assert_eq!((finding.resource.as_str(), finding.resource_type.as_str()), ("Arn", OUTPUT));
    assert_eq!(finding.rule, BROKEN_REFERENCE);
    assert_eq!(finding.severity, Severity::Critical);
    assert!(finding.message.contains("Ghost"));
    assert!(!report.passed);
}
