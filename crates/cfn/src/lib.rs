//! Reconciles a template against the live state of its deployed stack.

mod reconcile;
mod retry;
mod source;

pub use reconcile::{reconcile, reconcile_stack, NOT_DEPLOYED};
pub use retry::{collect, ReconciliationError, RetryPolicy};
pub use source::{FileSnapshotSource, LiveResource, LiveResourceSnapshot, LiveStateSource, SourceError, StackOutputs};
