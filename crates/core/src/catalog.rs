//! Static facts about the resource types the rules care about.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Storage,
    Database,
    Identity,
    Network,
    Compute,
    Messaging,
    Security,
    Observability,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    pub kind: ResourceKind,
    /// Holds data that is lost when the resource is deleted.
    pub stateful: bool,
    pub taggable: bool,
    /// Property that carries the tag set.
    pub tag_property: &'static str,
    /// Property that pins the physical name, if the type has one.
    pub name_property: Option<&'static str>,
}

const UNKNOWN: TypeInfo = TypeInfo {
    kind: ResourceKind::Other,
    stateful: false,
    taggable: false,
    tag_property: "Tags",
    name_property: None,
};

const fn info(kind: ResourceKind, stateful: bool, taggable: bool, name_property: Option<&'static str>) -> TypeInfo {
    TypeInfo { kind, stateful, taggable, tag_property: "Tags", name_property }
}

use ResourceKind::*;

static CATALOG: Lazy<HashMap<&'static str, TypeInfo>> = Lazy::new(|| {
    HashMap::from([
        ("AWS::S3::Bucket", info(Storage, true, true, Some("BucketName"))),
        ("AWS::S3::BucketPolicy", info(Identity, false, false, None)),
        ("AWS::EFS::FileSystem", TypeInfo { tag_property: "FileSystemTags", ..info(Storage, true, true, None) }),
        ("AWS::EC2::Volume", info(Storage, true, true, None)),
        ("AWS::ECR::Repository", info(Storage, true, true, Some("RepositoryName"))),
        ("AWS::RDS::DBInstance", info(Database, true, true, Some("DBInstanceIdentifier"))),
        ("AWS::RDS::DBCluster", info(Database, true, true, Some("DBClusterIdentifier"))),
        ("AWS::RDS::DBSubnetGroup", info(Network, false, true, Some("DBSubnetGroupName"))),
        ("AWS::DynamoDB::Table", info(Database, true, true, Some("TableName"))),
        ("AWS::ElastiCache::ReplicationGroup", info(Database, true, true, Some("ReplicationGroupId"))),
        ("AWS::ElastiCache::CacheCluster", info(Database, true, true, Some("ClusterName"))),
        ("AWS::Kinesis::Stream", info(Messaging, true, true, Some("Name"))),
        ("AWS::SQS::Queue", info(Messaging, true, true, Some("QueueName"))),
        ("AWS::SNS::Topic", info(Messaging, false, true, Some("TopicName"))),
        ("AWS::Logs::LogGroup", info(Observability, true, true, Some("LogGroupName"))),
        ("AWS::CloudWatch::Alarm", info(Observability, false, true, Some("AlarmName"))),
        ("AWS::KMS::Key", info(Security, true, true, None)),
        ("AWS::KMS::Alias", info(Security, false, false, Some("AliasName"))),
        ("AWS::SecretsManager::Secret", info(Security, true, true, Some("Name"))),
        ("AWS::WAFv2::WebACL", info(Security, false, true, Some("Name"))),
        ("AWS::SSM::Parameter", info(Security, false, true, Some("Name"))),
        ("AWS::IAM::Role", info(Identity, false, true, Some("RoleName"))),
        ("AWS::IAM::Policy", info(Identity, false, false, None)),
        ("AWS::IAM::ManagedPolicy", info(Identity, false, false, Some("ManagedPolicyName"))),
        ("AWS::IAM::User", info(Identity, false, true, Some("UserName"))),
        ("AWS::IAM::Group", info(Identity, false, false, Some("GroupName"))),
        ("AWS::IAM::InstanceProfile", info(Identity, false, false, Some("InstanceProfileName"))),
        ("AWS::EC2::VPC", info(Network, false, true, None)),
        ("AWS::EC2::Subnet", info(Network, false, true, None)),
        ("AWS::EC2::RouteTable", info(Network, false, true, None)),
        ("AWS::EC2::Route", info(Network, false, false, None)),
        ("AWS::EC2::SubnetRouteTableAssociation", info(Network, false, false, None)),
        ("AWS::EC2::InternetGateway", info(Network, false, true, None)),
        ("AWS::EC2::VPCGatewayAttachment", info(Network, false, false, None)),
        ("AWS::EC2::NatGateway", info(Network, false, true, None)),
        ("AWS::EC2::EIP", info(Network, false, true, None)),
        ("AWS::EC2::SecurityGroup", info(Network, false, true, Some("GroupName"))),
        ("AWS::EC2::SecurityGroupIngress", info(Network, false, false, None)),
        ("AWS::EC2::SecurityGroupEgress", info(Network, false, false, None)),
        ("AWS::ElasticLoadBalancingV2::LoadBalancer", info(Network, false, true, Some("Name"))),
        ("AWS::ElasticLoadBalancingV2::TargetGroup", info(Network, false, true, Some("Name"))),
        ("AWS::CloudFront::Distribution", info(Network, false, true, None)),
        ("AWS::EC2::Instance", info(Compute, false, true, None)),
        ("AWS::EC2::LaunchTemplate", info(Compute, false, false, Some("LaunchTemplateName"))),
        ("AWS::Lambda::Function", info(Compute, false, true, Some("FunctionName"))),
        ("AWS::ECS::Cluster", info(Compute, false, true, Some("ClusterName"))),
        ("AWS::ECS::Service", info(Compute, false, true, Some("ServiceName"))),
        ("AWS::ECS::TaskDefinition", info(Compute, false, true, None)),
    ])
});

pub fn type_info(type_name: &str) -> TypeInfo {
    CATALOG.get(type_name).copied().unwrap_or(UNKNOWN)
}

/// Every type the catalog knows, sorted.
pub fn known_types() -> Vec<&'static str> {
    let mut v: Vec<_> = CATALOG.keys().copied().collect();
    v.sort_unstable();
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_types_get_conservative_defaults() {
        let t = type_info("Custom::Thing");
        assert_eq!(t.kind, ResourceKind::Other);
        assert!(!t.stateful && !t.taggable && t.name_property.is_none());
    }

    #[test]
    fn efs_tags_live_under_their_own_property() {
        let t = type_info("AWS::EFS::FileSystem");
        assert_eq!(t.tag_property, "FileSystemTags");
        assert!(t.stateful);
    }
}
