//! Models: which tables are soft-deletable and which policy governs their relations.

pub mod policy;
pub mod registry;

pub use policy::DeletionPolicy;
pub use registry::{ModelDef, ModelRegistry, Relation};
