//! Process wiring: options, shared state, run loop

pub mod options;
pub mod run;
pub mod state;
