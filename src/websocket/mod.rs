mod handler;
mod message;

pub use handler::ws_handler;
pub use message::{
    ClientEvent, ErrorPayload, EventParseError, MetricsUpdate, OutboundMessage, PongPayload,
    ServerMessage, ShutdownPayload,
};
