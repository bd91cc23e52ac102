//! Websocket wire protocol: message shapes and request correlation.

mod messages;
mod requests;

pub use messages::{
    CommandParams, CommandSpec, DatarefParams, DatarefSpec, IndexSpec, WsCall, WsMessage,
    WsRequest,
};
pub use requests::{RequestId, RequestOutcome, RequestTracker};
