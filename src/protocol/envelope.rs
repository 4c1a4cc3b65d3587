//! Request and response envelopes and their text wire form.
//!
//! Both envelopes are JSON objects:
//!
//! ```text
//! request:  { "operationTag": "Echo", "correlationId": "ABC…", "payload": <content> }
//! response: { "operationTag": "Echo", "correlationId": "ABC…", "result": <content>,
//!             "outcome": { "isSuccess": true, "message": "" } }
//! ```
//!
//! `payload` and `result` hold only the content of the variant named by
//! `operationTag`. A failed response carries `null` as its result. Fields the
//! decoder does not know are ignored, so extra keys in the input can never
//! populate a second variant.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error_slot::ErrorSlot;
use super::variant::{parse_tag, Variant};
use crate::{CorrelationId, DecodeError, EncodeError, RpcError};

/// Content type advertised in transport metadata.
pub const CONTENT_TYPE: &str = "text/plain";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    operation_tag: String,
    correlation_id: CorrelationId,
    #[serde(default)]
    payload: Value,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    operation_tag: String,
    correlation_id: CorrelationId,
    #[serde(default)]
    result: Value,
    outcome: ErrorSlot,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CorrelationOnly {
    correlation_id: CorrelationId,
}

/// A request: one operation, its payload, and the id its reply must carry.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope<P: Variant> {
    pub operation: P::Tag,
    pub correlation_id: CorrelationId,
    pub payload: P,
}

impl<P: Variant> RequestEnvelope<P> {
    /// Wrap a payload under a freshly generated correlation id.
    pub fn new(payload: P) -> Self {
        Self::with_correlation_id(CorrelationId::generate(), payload)
    }

    pub fn with_correlation_id(correlation_id: CorrelationId, payload: P) -> Self {
        // ---
        Self {
            operation: payload.tag(),
            correlation_id,
            payload,
        }
    }
}

/// A response: the result of one operation, or the failure that replaced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope<R: Variant> {
    pub operation: R::Tag,
    pub correlation_id: CorrelationId,
    /// Present exactly when `outcome` reports success.
    pub result: Option<R>,
    pub outcome: ErrorSlot,
}

impl<R: Variant> ResponseEnvelope<R> {
    /// Build the response for `operation` from a handler's outcome.
    pub fn from_outcome<E: std::fmt::Display>(
        operation: R::Tag,
        correlation_id: CorrelationId,
        outcome: Result<R, E>,
    ) -> Self {
        // ---
        match outcome {
            Ok(result) => Self {
                operation,
                correlation_id,
                result: Some(result),
                outcome: ErrorSlot::success(),
            },
            Err(err) => Self {
                operation,
                correlation_id,
                result: None,
                outcome: ErrorSlot::to_wire(Some(&err)),
            },
        }
    }

    /// Turn the response into the caller-facing result.
    ///
    /// A remote "not implemented" outcome becomes [`RpcError::NotImplemented`];
    /// every other remote failure becomes [`RpcError::RemoteOperationFailed`].
    pub fn into_result(self) -> crate::Result<R> {
        // ---
        if let Some(remote) = self.outcome.from_wire() {
            if remote.is_not_implemented() {
                return Err(RpcError::NotImplemented(self.operation.to_string()));
            }
            return Err(RpcError::RemoteOperationFailed(remote));
        }
        self.result
            .ok_or_else(|| DecodeError::MissingResult(self.operation.to_string()).into())
    }
}

pub fn encode_request<P: Variant>(envelope: &RequestEnvelope<P>) -> Result<Bytes, EncodeError> {
    // ---
    let wire = WireRequest {
        operation_tag: envelope.operation.to_string(),
        correlation_id: envelope.correlation_id.clone(),
        payload: envelope.payload.encode_content()?,
    };
    Ok(Bytes::from(serde_json::to_vec(&wire)?))
}

/// Decode a request.
///
/// A well-formed envelope whose tag is outside `P`'s closed set yields
/// [`DecodeError::UnknownOperation`], which still carries the correlation id
/// so the receiver can answer it.
pub fn decode_request<P: Variant>(bytes: &[u8]) -> Result<RequestEnvelope<P>, DecodeError> {
    // ---
    let wire: WireRequest = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;

    let Some(operation) = parse_tag::<P::Tag>(&wire.operation_tag) else {
        return Err(DecodeError::UnknownOperation {
            operation: wire.operation_tag,
            correlation_id: wire.correlation_id,
        });
    };

    let payload = P::decode_content(operation, wire.payload).map_err(|source| {
        DecodeError::InvalidContent {
            operation: wire.operation_tag.clone(),
            source,
        }
    })?;

    Ok(RequestEnvelope {
        operation,
        correlation_id: wire.correlation_id,
        payload,
    })
}

/// Encode a response.
///
/// # Errors
///
/// A successful result whose variant does not match `envelope.operation`
/// fails with [`EncodeError::OperationMismatch`]; the content would otherwise
/// be read under the wrong shape.
pub fn encode_response<R: Variant>(envelope: &ResponseEnvelope<R>) -> Result<Bytes, EncodeError> {
    // ---
    let result = match (&envelope.result, envelope.outcome.is_success) {
        (Some(result), true) => {
            if result.tag() != envelope.operation {
                return Err(EncodeError::OperationMismatch {
                    expected: envelope.operation.to_string(),
                    found: result.tag().to_string(),
                });
            }
            result.encode_content()?
        }
        _ => Value::Null,
    };

    let wire = WireResponse {
        operation_tag: envelope.operation.to_string(),
        correlation_id: envelope.correlation_id.clone(),
        result,
        outcome: envelope.outcome.clone(),
    };
    Ok(Bytes::from(serde_json::to_vec(&wire)?))
}

/// Encode a failure response for an operation named only by its raw tag.
///
/// Used when the receiver cannot parse the tag and therefore has no typed
/// envelope to build.
pub fn encode_failure_response(
    operation: &str,
    correlation_id: &CorrelationId,
    outcome: ErrorSlot,
) -> Result<Bytes, EncodeError> {
    // ---
    let wire = WireResponse {
        operation_tag: operation.to_string(),
        correlation_id: correlation_id.clone(),
        result: Value::Null,
        outcome,
    };
    Ok(Bytes::from(serde_json::to_vec(&wire)?))
}

/// Decode the response to a request tagged `expected`.
///
/// The result shape is chosen by the originating request's tag; a response
/// naming any other operation is rejected.
pub fn decode_response<R: Variant>(
    bytes: &[u8],
    expected: R::Tag,
) -> Result<ResponseEnvelope<R>, DecodeError> {
    // ---
    let wire: WireResponse = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;

    let expected_name = expected.to_string();
    if wire.operation_tag != expected_name {
        return Err(DecodeError::OperationMismatch {
            expected: expected_name,
            found: wire.operation_tag,
        });
    }

    let result = if wire.outcome.is_success {
        let result = R::decode_content(expected, wire.result).map_err(|source| {
            DecodeError::InvalidContent {
                operation: expected_name,
                source,
            }
        })?;
        Some(result)
    } else {
        None
    };

    Ok(ResponseEnvelope {
        operation: expected,
        correlation_id: wire.correlation_id,
        result,
        outcome: wire.outcome,
    })
}

/// Read only the correlation id of an encoded envelope.
pub fn peek_correlation_id(bytes: &[u8]) -> Option<CorrelationId> {
    serde_json::from_slice::<CorrelationOnly>(bytes)
        .ok()
        .map(|c| c.correlation_id)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::str::FromStr;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum Op {
        Echo,
        Count,
        Me,
    }

    impl fmt::Display for Op {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Debug::fmt(self, f)
        }
    }

    impl FromStr for Op {
        type Err = ();

        fn from_str(s: &str) -> Result<Self, ()> {
            match s {
                "Echo" => Ok(Op::Echo),
                "Count" => Ok(Op::Count),
                "Me" => Ok(Op::Me),
                _ => Err(()),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: i64,
        name: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Payload {
        Echo(String),
        Count(Vec<i64>),
        Me(()),
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Output {
        Echo(String),
        Count(usize),
        Me(User),
    }

    crate::tagged_union!(Payload, Op { Echo, Count, Me });
    crate::tagged_union!(Output, Op { Echo, Count, Me });

    #[test]
    fn test_request_round_trip_every_shape() {
        // ---
        for payload in [
            Payload::Echo("hello".into()),
            Payload::Count(vec![1, 2, 3]),
            Payload::Me(()),
        ] {
            let envelope = RequestEnvelope::new(payload);
            let bytes = encode_request(&envelope).unwrap();
            let decoded: RequestEnvelope<Payload> = decode_request(&bytes).unwrap();
            assert_eq!(decoded, envelope);
        }
    }

    #[test]
    fn test_request_wire_shape() {
        // ---
        let envelope = RequestEnvelope::with_correlation_id(
            CorrelationId::from("ABCDEF"),
            Payload::Echo("hello".into()),
        );
        let json: Value = serde_json::from_slice(&encode_request(&envelope).unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "operationTag": "Echo",
                "correlationId": "ABCDEF",
                "payload": "hello"
            })
        );
    }

    #[test]
    fn test_extra_fields_never_populate_a_second_variant() {
        // ---
        let bytes = br#"{
            "operationTag": "Echo",
            "correlationId": "XYZ",
            "payload": "hi",
            "Count": [1, 2],
            "payloadMe": { "id": 1, "name": "bot" }
        }"#;
        let decoded: RequestEnvelope<Payload> = decode_request(bytes).unwrap();
        assert_eq!(decoded.payload, Payload::Echo("hi".into()));
        assert_eq!(decoded.operation, Op::Echo);
    }

    #[test]
    fn test_unknown_tag_keeps_correlation_id() {
        // ---
        let bytes = br#"{"operationTag":"SetChatPhoto","correlationId":"QQQ","payload":{}}"#;
        match decode_request::<Payload>(bytes) {
            Err(DecodeError::UnknownOperation {
                operation,
                correlation_id,
            }) => {
                assert_eq!(operation, "SetChatPhoto");
                assert_eq!(correlation_id.as_str(), "QQQ");
            }
            other => panic!("unexpected decode outcome: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_and_invalid_content() {
        // ---
        assert!(matches!(
            decode_request::<Payload>(b"not json"),
            Err(DecodeError::Malformed(_))
        ));
        let bytes = br#"{"operationTag":"Count","correlationId":"A","payload":"nope"}"#;
        assert!(matches!(
            decode_request::<Payload>(bytes),
            Err(DecodeError::InvalidContent { .. })
        ));
    }

    #[test]
    fn test_response_success_round_trip() {
        // ---
        let user = User {
            id: 42,
            name: "bot".into(),
        };
        let envelope = ResponseEnvelope::from_outcome::<String>(
            Op::Me,
            CorrelationId::generate(),
            Ok(Output::Me(user.clone())),
        );
        let bytes = encode_response(&envelope).unwrap();
        let decoded: ResponseEnvelope<Output> = decode_response(&bytes, Op::Me).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.into_result().unwrap(), Output::Me(user));
    }

    #[test]
    fn test_response_failure_carries_message_only() {
        // ---
        let envelope = ResponseEnvelope::<Output>::from_outcome(
            Op::Count,
            CorrelationId::generate(),
            Err("bad request: chat not found"),
        );
        let bytes = encode_response(&envelope).unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["result"], Value::Null);

        let decoded: ResponseEnvelope<Output> = decode_response(&bytes, Op::Count).unwrap();
        assert!(decoded.result.is_none());
        match decoded.into_result() {
            Err(RpcError::RemoteOperationFailed(remote)) => {
                assert_eq!(remote.message(), "bad request: chat not found");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_failure_response_for_raw_tag() {
        // ---
        let id = CorrelationId::from("RAW");
        let bytes = encode_failure_response("Bogus", &id, ErrorSlot::not_implemented()).unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["operationTag"], "Bogus");
        assert_eq!(json["outcome"]["isSuccess"], false);
        assert_eq!(peek_correlation_id(&bytes), Some(id));
    }

    #[test]
    fn test_not_implemented_outcome_maps_to_error() {
        // ---
        let bytes = encode_failure_response(
            "Echo",
            &CorrelationId::from("N"),
            ErrorSlot::not_implemented(),
        )
        .unwrap();
        let decoded: ResponseEnvelope<Output> = decode_response(&bytes, Op::Echo).unwrap();
        assert!(matches!(
            decoded.into_result(),
            Err(RpcError::NotImplemented(ref op)) if op == "Echo"
        ));
    }

    #[test]
    fn test_result_of_another_operation_is_not_encoded() {
        // ---
        let envelope = ResponseEnvelope::from_outcome::<String>(
            Op::Count,
            CorrelationId::generate(),
            Ok(Output::Echo("seven".into())),
        );
        match encode_response(&envelope) {
            Err(EncodeError::OperationMismatch { expected, found }) => {
                assert_eq!(expected, "Count");
                assert_eq!(found, "Echo");
            }
            other => panic!("unexpected encode outcome: {other:?}"),
        }
    }

    #[test]
    fn test_response_for_other_operation_is_rejected() {
        // ---
        let envelope = ResponseEnvelope::from_outcome::<String>(
            Op::Echo,
            CorrelationId::generate(),
            Ok(Output::Echo("x".into())),
        );
        let bytes = encode_response(&envelope).unwrap();
        assert!(matches!(
            decode_response::<Output>(&bytes, Op::Count),
            Err(DecodeError::OperationMismatch { .. })
        ));
    }
}
