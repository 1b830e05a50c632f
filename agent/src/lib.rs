//! fleetd
//!
//! Multi-cloud fleet orchestration core: node registry and lifecycle,
//! heartbeats, control-plane health monitoring, deployments, and the node
//! agent that runs application containers.

pub mod agent;
pub mod app;
pub mod deployments;
pub mod errors;
pub mod filesys;
pub mod heartbeat;
pub mod logs;
pub mod models;
pub mod monitor;
pub mod registry;
pub mod runtime;
pub mod storage;
pub mod telemetry;
pub mod utils;
pub mod vault;
pub mod workers;
