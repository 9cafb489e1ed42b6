// Relay Console Commands
// Operator command handlers for the interactive console

mod console;

pub use console::*;
