// Relay Console
// Operator client for a multi-destination live stream relay

pub mod commands;
pub mod models;
pub mod services;
