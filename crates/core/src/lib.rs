//! CloudFormation template model: loading, intrinsic expressions, the resource
//! dependency graph, and static resolution.

pub mod catalog;
mod error;
mod expr;
mod graph;
mod loader;
mod resolve;
mod template;

pub use catalog::{type_info, ResourceKind, TypeInfo};
pub use error::{LoadError, ResolveError};
pub use expr::{Expr, PseudoParameter, Reference, SubPart};
pub use loader::{from_value, load, load_json, load_path, load_yaml};
pub use resolve::{resolve, Lookup, ResolutionContext, ResolvedValue, Resolver};
pub use template::{DeletionPolicy, Output, Parameter, Resource, Tag, Tags, Template};
