//! Reply matching for one in-flight call.
//!
//! A reply stream may carry deliveries that belong to other calls (a shared
//! stream, or stale replies). Only a delivery bearing the call's correlation
//! id resolves it; everything else is discarded, never requeued.

use crate::{
    // ---
    log_debug,
    protocol::{decode_response, peek_correlation_id, ResponseEnvelope, Variant},
    CorrelationId,
    Delivery,
    DeliveryStream,
    Result,
    RpcError,
};

/// Read `stream` until a delivery for `correlation_id` arrives and decode it
/// as the response to `operation`.
///
/// The correlation id is taken from transport metadata when present and from
/// the envelope body otherwise. This future has no deadline of its own; callers
/// bound it with [`tokio::time::timeout_at`] and drop it on expiry.
///
/// # Errors
///
/// - [`RpcError::ConnectionLost`] if the stream ends first.
/// - [`RpcError::DecodeFailed`] if the matching delivery cannot be decoded.
pub async fn await_reply<R: Variant>(
    stream: &mut DeliveryStream,
    correlation_id: &CorrelationId,
    operation: R::Tag,
) -> Result<ResponseEnvelope<R>> {
    // ---
    loop {
        let Some(delivery) = stream.next().await else {
            return Err(RpcError::ConnectionLost);
        };

        if !is_reply_to(&delivery, correlation_id) {
            log_debug!(
                "discarding reply {:?} while waiting for {correlation_id}",
                delivery.correlation_id
            );
            continue;
        }

        let envelope = decode_response::<R>(&delivery.payload, operation)?;
        return Ok(envelope);
    }
}

fn is_reply_to(delivery: &Delivery, correlation_id: &CorrelationId) -> bool {
    // ---
    match delivery.correlation_id.as_deref() {
        Some(id) => id == correlation_id.as_str(),
        None => peek_correlation_id(&delivery.payload).as_ref() == Some(correlation_id),
    }
}
