//! Wire protocol: tagged unions, envelopes, and failures as data.
//!
//! Nothing in this module touches a broker. It turns typed values into the
//! bytes a transport carries and back.

mod envelope;
mod error_slot;
mod variant;

pub use envelope::{
    //
    decode_request,
    decode_response,
    encode_failure_response,
    encode_request,
    encode_response,
    peek_correlation_id,
    RequestEnvelope,
    ResponseEnvelope,
    CONTENT_TYPE,
};
pub use error_slot::{ErrorSlot, RemoteError, NOT_IMPLEMENTED_MESSAGE};
pub use variant::{parse_tag, OperationTag, Schema, Variant};
