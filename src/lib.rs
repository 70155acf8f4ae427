pub mod config;
pub mod constants;
pub mod error;
pub mod local;
pub mod stream;

pub use constants::MachineModel;
pub use error::{Error, RequestFailure, Result};
pub use local::LocalClient;
pub use stream::{MessageSink, StreamMessage};
