// nax-api: Async Rust client for the DM NAX remote API (HTTP session + WebSocket stream)

pub mod codec;
pub mod error;
pub mod session;
pub mod transport;
pub mod websocket;

pub use codec::{ActionReport, ActionResult, Frame, FrameDecoder};
pub use error::Error;
pub use session::Session;
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{RESYNC_REQUEST, StreamSink, StreamSource, connect_stream};
