// Relay Console Services
// Synchronization, preview playback and the transports behind them

mod events;
mod realtime_channel;
mod socketio;
mod socketio_client;
mod session_auth;
mod client_context;
mod sync_engine;
mod playback;
mod preview_manager;
mod ffplay_backend;
mod secret_store;
mod settings_manager;
mod log_manager;

pub use events::*;
pub use realtime_channel::*;
pub use socketio::*;
pub use socketio_client::*;
pub use session_auth::*;
pub use client_context::*;
pub use sync_engine::*;
pub use playback::*;
pub use preview_manager::*;
pub use ffplay_backend::*;
pub use secret_store::*;
pub use settings_manager::*;
pub use log_manager::*;
