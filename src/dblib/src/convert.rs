// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Per-column conversion from the remote type system to local values.

use tracing::trace;

use crate::error::DblibError;
use crate::protocol::{Connection, ConvertStatus, DestType, TypeTag};

/// Destination capacity for remote types outside the character and binary
/// classes, converted to text best-effort.
pub const OTHER_DEST_CAPACITY: usize = 1000;

/// A converted column value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CellValue {
    /// Text, from character-class sources or best-effort stringification.
    Text(String),
    /// Raw bytes, from binary-class sources.
    Binary(Vec<u8>),
}

/// Destination sizing rule for a conversion out of `tag`.
///
/// Character-class sources get one extra byte of capacity for the
/// terminator the wire format appends; binary-class sources are sized
/// exactly; anything else gets [`OTHER_DEST_CAPACITY`] and a text
/// destination.
fn dest_spec(tag: TypeTag, len: usize) -> (usize, DestType) {
    match tag {
        TypeTag::Char | TypeTag::VarChar | TypeTag::Text => (len + 1, DestType::Char),
        TypeTag::Binary | TypeTag::VarBinary => (len, DestType::Binary),
        TypeTag::Other(_) => (OTHER_DEST_CAPACITY, DestType::Char),
    }
}

/// Converts one column's raw data into a local value.
///
/// Returns `Ok(None)` when the engine cannot convert the source type into
/// the chosen destination, or when the conversion call itself reports
/// failure or bad data: a single unconvertible column degrades to null
/// rather than aborting the row stream. The only hard failure is running
/// out of memory for the destination buffer.
pub fn convert_column<C>(
    conn: &C,
    tag: TypeTag,
    data: &[u8],
) -> Result<Option<CellValue>, DblibError>
where
    C: Connection + ?Sized,
{
    let (capacity, dest_type) = dest_spec(tag, data.len());
    trace!(?tag, ?dest_type, len = data.len(), capacity, "converting column");

    if !conn.will_convert(tag, dest_type) {
        trace!(?tag, ?dest_type, "column cannot be converted to this type");
        return Ok(None);
    }

    let mut dest = Vec::new();
    dest.try_reserve_exact(capacity).map_err(|err| {
        DblibError::OutOfMemory(format!(
            "failed to allocate {capacity} bytes for column value: {err}"
        ))
    })?;

    match conn.convert(tag, data, dest_type, &mut dest) {
        ConvertStatus::Converted => Ok(Some(match dest_type {
            DestType::Char => CellValue::Text(String::from_utf8_lossy(&dest).into_owned()),
            DestType::Binary => CellValue::Binary(dest),
        })),
        ConvertStatus::Failed => {
            trace!("failed to convert column");
            Ok(None)
        }
        ConvertStatus::BadData => {
            trace!("failed to convert column: null pointer or bad data type");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mock::{MockConnection, MockDriver, MockEngine};
    use crate::protocol::{Driver, Login};
    use crate::session::LogHandler;

    async fn connection(engine: &Arc<MockEngine>) -> MockConnection {
        MockDriver::new(Arc::clone(engine))
            .connect(&Login::new("u", "p"), "127.0.0.1", Arc::new(LogHandler))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn character_class_gets_terminator_capacity() {
        let engine = MockEngine::new();
        let conn = connection(&engine).await;

        let value = convert_column(&conn, TypeTag::VarChar, b"abc").unwrap();
        assert_eq!(value, Some(CellValue::Text("abc".into())));

        let calls = engine.convert_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].to, DestType::Char);
        assert_eq!(calls[0].capacity, 4);
    }

    #[tokio::test]
    async fn binary_class_is_sized_exactly() {
        let engine = MockEngine::new();
        let conn = connection(&engine).await;

        let value = convert_column(&conn, TypeTag::Binary, &[0xde, 0xad]).unwrap();
        assert_eq!(value, Some(CellValue::Binary(vec![0xde, 0xad])));

        let calls = engine.convert_calls();
        assert_eq!(calls[0].to, DestType::Binary);
        assert_eq!(calls[0].capacity, 2);
    }

    #[tokio::test]
    async fn other_types_get_the_generous_default() {
        let engine = MockEngine::new();
        let conn = connection(&engine).await;

        let value = convert_column(&conn, TypeTag::Other(56), b"42").unwrap();
        assert_eq!(value, Some(CellValue::Text("42".into())));

        let calls = engine.convert_calls();
        assert_eq!(calls[0].to, DestType::Char);
        assert_eq!(calls[0].capacity, OTHER_DEST_CAPACITY);
    }

    #[tokio::test]
    async fn unconvertible_types_degrade_to_null_without_a_call() {
        let engine = MockEngine::new();
        engine.mark_unconvertible(TypeTag::Other(34), DestType::Char);
        let conn = connection(&engine).await;

        let value = convert_column(&conn, TypeTag::Other(34), &[1, 2, 3]).unwrap();
        assert_eq!(value, None);
        assert!(engine.convert_calls().is_empty());
    }

    #[tokio::test]
    async fn conversion_failure_degrades_to_null() {
        let engine = MockEngine::new();
        engine.force_convert_status(ConvertStatus::Failed);
        let conn = connection(&engine).await;

        let value = convert_column(&conn, TypeTag::Char, b"x").unwrap();
        assert_eq!(value, None);

        engine.force_convert_status(ConvertStatus::BadData);
        let value = convert_column(&conn, TypeTag::Char, b"x").unwrap();
        assert_eq!(value, None);
    }
}
