mod registry;

pub use registry::{NodeRegistry, NodeSpec, NODE_CATEGORY};
