//! In-process notification fan-out and the error-sink reporter.

pub mod error_sink;
pub mod router;
pub mod topics;

pub use error_sink::ErrorSink;
pub use router::{OutboundFrame, SocketId, TopicRouter};
pub use topics::Topic;
