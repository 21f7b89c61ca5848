//! Constants shared by the fake collector, the agent and the test harness.

#![no_std]

pub mod env;
pub mod methods;
pub mod wire;
