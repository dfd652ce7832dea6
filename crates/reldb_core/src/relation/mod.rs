//! Relations: stored versions, codec plans and the registry.

pub(crate) mod codecs;
mod info;
mod registry;

pub use info::RelationInfo;
pub use registry::RelationRegistry;
