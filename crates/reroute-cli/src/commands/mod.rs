//! `reroute` subcommands

pub mod check;
pub mod simulate;
pub mod validate;
