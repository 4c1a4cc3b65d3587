//! Operation registry: the mapping from operation tag to handler.
//!
//! The server knows nothing about individual operations. It hands every
//! decoded payload to an [`OperationRegistry`] and publishes whatever comes
//! back.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::protocol::{Schema, Variant};

/// Error returned by a handler. Only its message reaches the caller.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one handler invocation.
pub type HandlerResult<O> = std::result::Result<O, HandlerError>;

type BoxFuture<O> = Pin<Box<dyn Future<Output = HandlerResult<O>> + Send>>;

type BoxedHandler<S> =
    Arc<dyn Fn(<S as Schema>::Payload) -> BoxFuture<<S as Schema>::Output> + Send + Sync>;

/// Dispatches decoded payloads to operation handlers.
#[async_trait::async_trait]
pub trait OperationRegistry<S: Schema>: Send + Sync {
    /// Run the handler for `payload`'s tag.
    ///
    /// Returns `None` when no handler is registered for that tag.
    async fn invoke(&self, payload: S::Payload) -> Option<HandlerResult<S::Output>>;
}

/// Shared registry pointer.
pub type RegistryPtr<S> = Arc<dyn OperationRegistry<S>>;

/// Registry built from one async closure per operation tag.
///
/// ```
/// # use broker_rpc::{tagged_union, HandlerRegistry, Schema};
/// # #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// # enum Op { Echo }
/// # impl std::fmt::Display for Op {
/// #     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("Echo") }
/// # }
/// # impl std::str::FromStr for Op {
/// #     type Err = ();
/// #     fn from_str(s: &str) -> Result<Self, ()> { if s == "Echo" { Ok(Op::Echo) } else { Err(()) } }
/// # }
/// # enum Payload { Echo(String) }
/// # enum Output { Echo(String) }
/// # tagged_union!(Payload, Op { Echo });
/// # tagged_union!(Output, Op { Echo });
/// # struct Echoes;
/// # impl Schema for Echoes { type Tag = Op; type Payload = Payload; type Output = Output; }
/// let registry = HandlerRegistry::<Echoes>::new().register(Op::Echo, |payload| async move {
///     match payload {
///         Payload::Echo(text) => Ok(Output::Echo(text)),
///     }
/// });
/// assert!(registry.handles(Op::Echo));
/// ```
pub struct HandlerRegistry<S: Schema> {
    handlers: HashMap<S::Tag, BoxedHandler<S>>,
}

impl<S: Schema> HandlerRegistry<S> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `tag`, replacing any previous one.
    pub fn register<F, Fut>(mut self, tag: S::Tag, handler: F) -> Self
    where
        F: Fn(S::Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<S::Output>> + Send + 'static,
    {
        // ---
        let boxed: BoxedHandler<S> =
            Arc::new(move |payload| -> BoxFuture<S::Output> { Box::pin(handler(payload)) });
        self.handlers.insert(tag, boxed);
        self
    }

    pub fn handles(&self, tag: S::Tag) -> bool {
        self.handlers.contains_key(&tag)
    }
}

impl<S: Schema> Default for HandlerRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<S: Schema> OperationRegistry<S> for HandlerRegistry<S> {
    async fn invoke(&self, payload: S::Payload) -> Option<HandlerResult<S::Output>> {
        // ---
        let handler = self.handlers.get(&payload.tag())?.clone();
        Some(handler(payload).await)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::fmt;
    use std::str::FromStr;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum Op {
        Double,
        Halve,
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
                "Double" => Ok(Op::Double),
                "Halve" => Ok(Op::Halve),
                _ => Err(()),
            }
        }
    }

    #[derive(Debug, PartialEq)]
    enum Numbers {
        Double(i64),
        Halve(i64),
    }

    crate::tagged_union!(Numbers, Op { Double, Halve });

    struct Arith;

    impl Schema for Arith {
        type Tag = Op;
        type Payload = Numbers;
        type Output = Numbers;
    }

    #[tokio::test]
    async fn test_dispatch_by_tag() {
        // ---
        let registry = HandlerRegistry::<Arith>::new().register(Op::Double, |n| async move {
            match n {
                Numbers::Double(v) => Ok(Numbers::Double(v * 2)),
                other => Err(format!("unexpected {other:?}").into()),
            }
        });

        let out = registry.invoke(Numbers::Double(21)).await.unwrap().unwrap();
        assert_eq!(out, Numbers::Double(42));
        assert!(registry.invoke(Numbers::Halve(4)).await.is_none());
    }

    #[tokio::test]
    async fn test_handler_error_is_returned() {
        // ---
        let registry = HandlerRegistry::<Arith>::new()
            .register(Op::Halve, |_| async { Err("odd number".into()) });

        let err = registry.invoke(Numbers::Halve(3)).await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "odd number");
    }
}
