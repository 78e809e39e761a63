//! Scenario validation and simulation for the unit reroute engine

pub mod commands;
pub mod scenario;
