//! Data models shared by the control plane and the node agent

pub mod deployment;
pub mod instance;
pub mod node;

pub use deployment::*;
pub use instance::*;
pub use node::*;
