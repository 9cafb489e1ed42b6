// Relay Console Models
// Data structures for the client

mod settings;
mod start_request;
mod stream_record;
mod stream_row;

pub use settings::*;
pub use start_request::*;
pub use stream_record::*;
pub use stream_row::*;
