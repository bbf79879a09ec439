//! Transport bindings over the shared [`crate::protocol::Dispatcher`].
//!
//! - [`StreamTransport`]: newline-delimited JSON over a byte stream
//! - [`HttpTransport`]: HTTP request/response plus an SSE push stream

pub mod framing;
pub mod http;
mod stream;

pub use framing::{Frame, LineFramer};
pub use http::{EventBroadcaster, HttpTransport, HttpTransportHandle, PushEvent, Subscription};
pub use stream::{StreamTransport, StreamTransportHandle};
