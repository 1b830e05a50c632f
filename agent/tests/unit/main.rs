//! Integration tests for fleetd


mod test_agent;
mod test_monitor;
mod test_registry;
mod test_vault;
