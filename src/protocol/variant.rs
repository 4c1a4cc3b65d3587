//! Closed tagged unions carried inside envelopes.
//!
//! An operation set is described once, at compile time:
//!
//! - a tag enum implementing [`OperationTag`] (its `Display` form is the wire
//!   tag and `FromStr` recovers it),
//! - a payload union and an output union implementing [`Variant`] over that
//!   tag, one variant per operation,
//! - a [`Schema`] tying the three together.
//!
//! Decoding is driven by the tag alone. The receiver never inspects content to
//! guess its shape, and only the content belonging to the tagged variant is
//! read.

use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::str::FromStr;

use serde_json::Value;

use crate::EncodeError;

/// Tag selecting one operation of a closed set.
pub trait OperationTag:
    Copy + Eq + Hash + Debug + Display + FromStr + Send + Sync + 'static
{
}

impl<T> OperationTag for T where
    T: Copy + Eq + Hash + Debug + Display + FromStr + Send + Sync + 'static
{
}

/// A value that is exactly one of a closed set of shapes, identified by tag.
pub trait Variant: Sized + Send + 'static {
    type Tag: OperationTag;

    /// The tag of the populated shape.
    fn tag(&self) -> Self::Tag;

    /// Serialize the populated shape's content, without the tag.
    ///
    /// Returns [`EncodeError::UnsupportedVariant`] for shapes that exist
    /// locally but cannot travel over the broker; such a value must fail the
    /// call instead of being sent with its data dropped.
    fn encode_content(&self) -> Result<Value, EncodeError>;

    /// Rebuild the shape selected by `tag` from its content.
    fn decode_content(tag: Self::Tag, content: Value) -> Result<Self, serde_json::Error>;
}

/// The operation set shared by a client and a server.
pub trait Schema: Send + Sync + 'static {
    type Tag: OperationTag;
    type Payload: Variant<Tag = Self::Tag>;
    type Output: Variant<Tag = Self::Tag>;
}

/// Parse a wire tag, yielding `None` for tags outside the closed set.
pub fn parse_tag<T: OperationTag>(raw: &str) -> Option<T> {
    raw.parse().ok()
}

/// Implement [`Variant`] for an enum whose variants are all newtypes, one per
/// tag, with matching names.
///
/// ```
/// use broker_rpc::{tagged_union, Variant};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// enum Op { Echo, Add }
///
/// impl std::fmt::Display for Op {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         std::fmt::Debug::fmt(self, f)
///     }
/// }
///
/// impl std::str::FromStr for Op {
///     type Err = ();
///     fn from_str(s: &str) -> Result<Self, ()> {
///         match s { "Echo" => Ok(Op::Echo), "Add" => Ok(Op::Add), _ => Err(()) }
///     }
/// }
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct AddArgs { a: i64, b: i64 }
///
/// #[derive(Debug, PartialEq)]
/// enum Payload { Echo(String), Add(AddArgs) }
///
/// tagged_union!(Payload, Op { Echo, Add });
///
/// let payload = Payload::Add(AddArgs { a: 1, b: 2 });
/// assert_eq!(payload.tag(), Op::Add);
/// let content = payload.encode_content().unwrap();
/// assert_eq!(Payload::decode_content(Op::Add, content).unwrap(), payload);
/// ```
#[macro_export]
macro_rules! tagged_union {
    ($union:ident, $tag:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::Variant for $union {
            type Tag = $tag;

            fn tag(&self) -> $tag {
                match self {
                    $( $union::$variant(_) => $tag::$variant, )+
                }
            }

            fn encode_content(
                &self,
            ) -> ::std::result::Result<$crate::serde_json::Value, $crate::EncodeError> {
                match self {
                    $(
                        $union::$variant(inner) => $crate::serde_json::to_value(inner)
                            .map_err($crate::EncodeError::from),
                    )+
                }
            }

            fn decode_content(
                tag: $tag,
                content: $crate::serde_json::Value,
            ) -> ::std::result::Result<Self, $crate::serde_json::Error> {
                match tag {
                    $(
                        $tag::$variant => $crate::serde_json::from_value(content)
                            .map($union::$variant),
                    )+
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::fmt;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum Op {
        Ping,
        Rename,
        Upload,
    }

    impl fmt::Display for Op {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Debug::fmt(self, f)
        }
    }

    impl FromStr for Op {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, String> {
            match s {
                "Ping" => Ok(Op::Ping),
                "Rename" => Ok(Op::Rename),
                "Upload" => Ok(Op::Upload),
                other => Err(other.to_string()),
            }
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct RenameArgs {
        id: u32,
        title: String,
    }

    #[derive(Debug, PartialEq)]
    enum Payload {
        Ping(()),
        Rename(RenameArgs),
        Upload(Vec<u8>),
    }

    crate::tagged_union!(Payload, Op { Ping, Rename, Upload });

    /// Hand-written union with a shape that refuses to travel.
    #[derive(Debug)]
    enum LocalOnly {
        Ping,
        Upload(std::path::PathBuf),
    }

    impl Variant for LocalOnly {
        type Tag = Op;

        fn tag(&self) -> Op {
            match self {
                LocalOnly::Ping => Op::Ping,
                LocalOnly::Upload(_) => Op::Upload,
            }
        }

        fn encode_content(&self) -> Result<Value, EncodeError> {
            match self {
                LocalOnly::Ping => Ok(Value::Null),
                LocalOnly::Upload(_) => Err(EncodeError::UnsupportedVariant(self.tag().to_string())),
            }
        }

        fn decode_content(tag: Op, _content: Value) -> Result<Self, serde_json::Error> {
            match tag {
                Op::Ping => Ok(LocalOnly::Ping),
                _ => Err(serde::de::Error::custom(format!("{tag} is local only"))),
            }
        }
    }

    #[test]
    fn test_tag_follows_populated_variant() {
        // ---
        assert_eq!(Payload::Ping(()).tag(), Op::Ping);
        assert_eq!(Payload::Upload(vec![1]).tag(), Op::Upload);
    }

    #[test]
    fn test_decode_selected_by_tag_only() {
        // ---
        let content = serde_json::json!({ "id": 7, "title": "x", "extra": [1, 2, 3] });
        let decoded = Payload::decode_content(Op::Rename, content).unwrap();
        assert_eq!(
            decoded,
            Payload::Rename(RenameArgs {
                id: 7,
                title: "x".into()
            })
        );
    }

    #[test]
    fn test_decode_rejects_content_of_another_shape() {
        // ---
        let content = serde_json::json!({ "id": 7, "title": "x" });
        assert!(Payload::decode_content(Op::Upload, content).is_err());
    }

    #[test]
    fn test_unit_content_is_null() {
        // ---
        let content = Payload::Ping(()).encode_content().unwrap();
        assert_eq!(content, Value::Null);
        assert_eq!(
            Payload::decode_content(Op::Ping, content).unwrap(),
            Payload::Ping(())
        );
    }

    #[test]
    fn test_unsupported_variant_fails_fast() {
        // ---
        let err = LocalOnly::Upload("/tmp/a.png".into())
            .encode_content()
            .unwrap_err();
        assert!(matches!(err, EncodeError::UnsupportedVariant(ref tag) if tag == "Upload"));
        assert!(LocalOnly::Ping.encode_content().is_ok());
    }

    #[test]
    fn test_parse_tag() {
        // ---
        assert_eq!(parse_tag::<Op>("Rename"), Some(Op::Rename));
        assert_eq!(parse_tag::<Op>("Bogus"), None);
    }
}
