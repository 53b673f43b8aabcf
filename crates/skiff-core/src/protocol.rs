//! Wire protocol between a driver and the guest runner inside a sandbox
//!
//! Messages are MessagePack-encoded and carried in length-prefixed frames
//! (see [`crate::pipe`]).

use crate::{ActivationId, InitResult, RunResult};
use serde::{Deserialize, Serialize};

/// Driver to guest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Load action code
    Init { main: String, code: String },
    /// Invoke the loaded action with a JSON payload
    Run {
        payload: serde_json::Value,
        activation_id: ActivationId,
    },
}

/// Guest to driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Init(InitResult),
    Run(RunResult),
    Error { message: String },
}

/// Encode a message to msgpack
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(msg)
}

/// Decode a message from msgpack
pub fn decode<'a, T: Deserialize<'a>>(data: &'a [u8]) -> Result<T, rmp_serde::decode::Error> {
    rmp_serde::from_slice(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn run_request_keeps_payload() {
        let id = ActivationId::new();
        let bytes = encode(&Request::Run {
            payload: json!({"name": "skiff", "n": 3}),
            activation_id: id,
        })
        .unwrap();

        match decode::<Request>(&bytes).unwrap() {
            Request::Run {
                payload,
                activation_id,
            } => {
                assert_eq!(payload, json!({"name": "skiff", "n": 3}));
                assert_eq!(activation_id, id);
            }
            other @ Request::Init { .. } => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn init_failure_response() {
        let bytes = encode(&Response::Init(InitResult::failure(
            Duration::from_millis(5),
            "syntax error",
        )))
        .unwrap();

        match decode::<Response>(&bytes).unwrap() {
            Response::Init(result) => {
                assert!(!result.ok);
                assert_eq!(result.error.as_deref(), Some("syntax error"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
