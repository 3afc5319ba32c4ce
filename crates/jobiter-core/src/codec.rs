//! Cursor codec: guards the invariant that a cursor survives the transport.
//!
//! A codec must use the same encoding the transport uses for job arguments.
//! [`CursorCodec::validate`] is called at the moment a cursor is about to be
//! persisted, so the run that produced a bad cursor is the one that fails.

use crate::cursor::Cursor;
use crate::error::CursorError;

/// Encoding used to carry cursors between runs.
pub trait CursorCodec: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    fn encode(&self, cursor: &Cursor) -> Result<Vec<u8>, CursorError>;

    fn decode(&self, bytes: &[u8]) -> Result<Cursor, CursorError>;

    /// Check that `cursor` decodes back to an equal value and that
    /// `encode(decode(encode(c))) == encode(c)`.
    fn validate(&self, cursor: &Cursor) -> Result<(), CursorError> {
        let encoded = self.encode(cursor)?;
        let decoded = self.decode(&encoded)?;

        let mismatch = || CursorError::RoundTrip {
            codec: self.name(),
            cursor_type: cursor.type_name(),
            cursor: cursor.to_string(),
            decoded: format!("{} {}", decoded.type_name(), decoded),
        };

        if decoded != *cursor {
            return Err(mismatch());
        }
        if self.encode(&decoded)? != encoded {
            return Err(mismatch());
        }
        Ok(())
    }
}

/// JSON codec, matching the payload encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl CursorCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, cursor: &Cursor) -> Result<Vec<u8>, CursorError> {
        serde_json::to_vec(cursor).map_err(|e| CursorError::Encode {
            codec: self.name(),
            cursor_type: cursor.type_name(),
            message: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Cursor, CursorError> {
        serde_json::from_slice(bytes).map_err(|e| CursorError::Decode {
            codec: self.name(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_representable_cursors_validate() {
        let codec = JsonCodec;
        let cursors = vec![
            Cursor::from(0),
            Cursor::from(i64::MAX),
            Cursor::from(-17),
            Cursor::from("products/42"),
            Cursor::from(true),
            Cursor::from(0.25),
            Cursor::from(vec![1, 2, 3]),
            Cursor::map([
                ("id", Cursor::from(42)),
                ("name", Cursor::from("lipstick")),
                ("nested", Cursor::map([("page", Cursor::from(3))])),
            ]),
        ];

        for cursor in cursors {
            assert!(
                codec.validate(&cursor).is_ok(),
                "expected {} to validate",
                cursor
            );
        }
    }

    #[test]
    fn test_timestamp_cursor_is_rejected() {
        let time = Utc.timestamp_opt(0, 0).unwrap();
        let err = JsonCodec.validate(&Cursor::from(time)).unwrap_err();

        match err {
            CursorError::RoundTrip {
                cursor_type,
                decoded,
                ..
            } => {
                assert_eq!(cursor_type, "timestamp");
                assert!(decoded.starts_with("string"));
            }
            other => panic!("Expected RoundTrip, got {other:?}"),
        }
    }

    #[test]
    fn test_timestamp_nested_in_map_is_rejected() {
        let time = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let cursor = Cursor::map([("id", Cursor::from(1)), ("at", Cursor::from(time))]);
        assert!(JsonCodec.validate(&cursor).is_err());
    }

    #[test]
    fn test_non_finite_float_is_rejected() {
        // NaN encodes as null, which is not a cursor value.
        let err = JsonCodec.validate(&Cursor::from(f64::NAN)).unwrap_err();
        assert!(matches!(err, CursorError::Decode { .. }));
    }
}
