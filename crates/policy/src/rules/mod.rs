//! Built-in rules.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value as Json;

use crate::rule::Rule;

pub mod deletion;
pub mod encryption;
pub mod iam;
pub mod naming;
pub mod network;
pub mod public_access;
pub mod tags;

pub use deletion::DeletionSafety;
pub use encryption::EncryptionAtRest;
pub use iam::LeastPrivilege;
pub use naming::ParameterizedNaming;
pub use network::NetworkExposure;
pub use public_access::PublicAccessBlock;
pub use tags::MandatoryTags;

/// Built-in rule ids in registration order.
pub const BUILTIN: [&str; 7] = [
    "encryption-at-rest",
    "iam-least-privilege",
    "public-access-block",
    "mandatory-tags",
    "parameterized-naming",
    "deletion-safety",
    "network-exposure",
];

fn options<T: DeserializeOwned>(id: &str, raw: Json) -> Result<T> {
    let raw = if raw.is_null() { Json::Object(Default::default()) } else { raw };
    serde_json::from_value(raw).with_context(|| format!("invalid options for rule {id}"))
}

/// Builds a built-in rule from its id and option object (`null` for defaults).
pub fn build(id: &str, raw: Json) -> Result<Box<dyn Rule>> {
    Ok(match id {
        "encryption-at-rest" => Box::new(EncryptionAtRest::new(options(id, raw)?)),
        "iam-least-privilege" => Box::new(
            LeastPrivilege::new(options(id, raw)?).with_context(|| format!("invalid admin action pattern for {id}"))?,
        ),
        "public-access-block" => Box::new(PublicAccessBlock::new(options(id, raw)?)),
        "mandatory-tags" => Box::new(MandatoryTags::new(options(id, raw)?)),
        "parameterized-naming" => Box::new(ParameterizedNaming::new(options(id, raw)?)),
        "deletion-safety" => Box::new(DeletionSafety::new(options(id, raw)?)),
        "network-exposure" => Box::new(NetworkExposure::new(options(id, raw)?)),
        other => bail!("unknown rule '{other}'"),
    })
}

/// Every built-in rule with default options.
pub fn all() -> Result<Vec<Box<dyn Rule>>> {
    BUILTIN.iter().map(|id| build(id, Json::Null)).collect()
}
