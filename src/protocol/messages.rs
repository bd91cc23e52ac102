//! Serde shapes for the simulator's websocket protocol.
//!
//! Outbound frames carry a client-chosen `req_id` plus a typed payload;
//! inbound frames are either an acknowledgement (`result`) or an unsolicited
//! push of dataref values / command activity.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::metadata::Ident;
use crate::protocol::RequestId;

/// Outbound envelope: a correlation id wrapped around one typed call.
#[derive(Debug, Clone, Serialize)]
pub struct WsRequest {
    pub req_id: RequestId,
    #[serde(flatten)]
    pub call: WsCall,
}

/// The typed payload of an outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "params")]
pub enum WsCall {
    #[serde(rename = "dataref_subscribe_values")]
    SubscribeDatarefs(DatarefParams),
    #[serde(rename = "dataref_unsubscribe_values")]
    UnsubscribeDatarefs(DatarefParams),
    #[serde(rename = "dataref_set_values")]
    SetDatarefs(DatarefParams),
    #[serde(rename = "command_subscribe_is_active")]
    SubscribeCommands(CommandParams),
    #[serde(rename = "command_unsubscribe_is_active")]
    UnsubscribeCommands(CommandParams),
    #[serde(rename = "command_set_is_active")]
    SetCommands(CommandParams),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatarefParams {
    pub datarefs: Vec<DatarefSpec>,
}

impl DatarefParams {
    pub fn one(spec: DatarefSpec) -> Self {
        Self { datarefs: vec![spec] }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandParams {
    pub commands: Vec<CommandSpec>,
}

impl CommandParams {
    pub fn one(spec: CommandSpec) -> Self {
        Self { commands: vec![spec] }
    }
}

/// One dataref reference inside a call. `index` narrows array datarefs,
/// `value` is only present on set calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatarefSpec {
    pub id: Ident,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl DatarefSpec {
    pub fn whole(id: Ident) -> Self {
        Self { id, index: None, value: None }
    }

    pub fn indexed(id: Ident, indices: Vec<usize>) -> Self {
        let index = match indices.len() {
            0 => None,
            1 => Some(IndexSpec::One(indices[0])),
            _ => Some(IndexSpec::Many(indices)),
        };
        Self { id, index, value: None }
    }
}

/// A single array slot or a list of slots.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IndexSpec {
    One(usize),
    Many(Vec<usize>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandSpec {
    pub id: Ident,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl CommandSpec {
    pub fn subscribe(id: Ident) -> Self {
        Self { id, is_active: None, duration: None }
    }

    pub fn activate(id: Ident, duration: f64) -> Self {
        Self { id, is_active: Some(true), duration: Some(duration) }
    }

    pub fn begin(id: Ident) -> Self {
        Self { id, is_active: Some(true), duration: None }
    }

    pub fn end(id: Ident) -> Self {
        Self { id, is_active: Some(false), duration: None }
    }
}

/// An inbound frame. Identifier keys arrive as JSON strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "result")]
    Result {
        req_id: RequestId,
        success: bool,
        #[serde(default)]
        error_code: Option<String>,
        #[serde(default)]
        error_message: Option<String>,
    },
    #[serde(rename = "dataref_update_values")]
    DatarefUpdate { data: HashMap<String, serde_json::Value> },
    #[serde(rename = "command_update_is_active")]
    CommandActive { data: HashMap<String, bool> },
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribe_request_wire_shape() {
        let req = WsRequest {
            req_id: 7,
            call: WsCall::SubscribeDatarefs(DatarefParams::one(DatarefSpec::indexed(
                12,
                vec![0, 3],
            ))),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "req_id": 7,
                "type": "dataref_subscribe_values",
                "params": { "datarefs": [ { "id": 12, "index": [0, 3] } ] }
            })
        );
    }

    #[test]
    fn single_index_serializes_as_scalar() {
        let spec = DatarefSpec::indexed(5, vec![2]);
        assert_eq!(serde_json::to_value(&spec).unwrap(), json!({ "id": 5, "index": 2 }));
    }

    #[test]
    fn whole_dataref_omits_index_and_value() {
        let spec = DatarefSpec::whole(5);
        assert_eq!(serde_json::to_value(&spec).unwrap(), json!({ "id": 5 }));
    }

    #[test]
    fn command_activation_wire_shape() {
        let req = WsRequest {
            req_id: 1,
            call: WsCall::SetCommands(CommandParams::one(CommandSpec::activate(3, 5.0))),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "req_id": 1,
                "type": "command_set_is_active",
                "params": { "commands": [ { "id": 3, "is_active": true, "duration": 5.0 } ] }
            })
        );
    }

    #[test]
    fn parses_result_frame() {
        let raw = r#"{"type":"result","req_id":9,"success":false,"error_code":"NOT_FOUND"}"#;
        match serde_json::from_str::<WsMessage>(raw).unwrap() {
            WsMessage::Result { req_id, success, error_code, .. } => {
                assert_eq!(req_id, 9);
                assert!(!success);
                assert_eq!(error_code.as_deref(), Some("NOT_FOUND"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn parses_update_frame() {
        let raw = r#"{"type":"dataref_update_values","data":{"12":[1.0,2.0],"13":4.5}}"#;
        match serde_json::from_str::<WsMessage>(raw).unwrap() {
            WsMessage::DatarefUpdate { data } => {
                assert_eq!(data.len(), 2);
                assert_eq!(data["13"], json!(4.5));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_type_is_tolerated() {
        let raw = r#"{"type":"something_new","data":{}}"#;
        assert!(matches!(serde_json::from_str::<WsMessage>(raw).unwrap(), WsMessage::Unknown));
    }
}
