// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The DB-Library-style protocol seam.
//!
//! [`Driver`] and [`Connection`] model the handle-based command/result
//! protocol of a legacy tabular database client: submit a command, execute
//! it, request its result set, then fetch rows one at a time and inspect
//! each column's type tag, length, and raw data. Protocol-level failures
//! are reported as status codes rather than errors so the caller can
//! classify them; only engine-reported errors (which cancel the in-flight
//! call) and transport breakdowns surface as [`DblibError`].
//!
//! Status enums carry an `Other` variant because the wire protocol reports
//! integer codes: an unrecognized code must stay representable so the
//! caller can reject it by name.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DblibError;
use crate::session::MessageHandler;

/// The remote engine's classification of a column, distinct from the local
/// type system. Tags outside the character and binary classes are carried
/// through as `Other` with the engine's numeric code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// Fixed-width character data.
    Char,
    /// Variable-width character data.
    VarChar,
    /// Large text data.
    Text,
    /// Fixed-width binary data.
    Binary,
    /// Variable-width binary data.
    VarBinary,
    /// Any other remote type, identified by its wire code.
    Other(i32),
}

/// The destination representation for a column conversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DestType {
    /// Null-terminated text.
    Char,
    /// Raw bytes, no terminator.
    Binary,
}

/// Success or failure of a protocol call that cannot report detail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum Retcode {
    Succeed,
    Fail,
}

/// Outcome of requesting a command's result set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum ResultsStatus {
    /// A result set is available.
    Succeed,
    /// The command produced no result sets.
    NoMoreResults,
    /// The request failed.
    Fail,
    /// The engine reported a code this protocol does not recognize.
    Other(i32),
}

/// Outcome of fetching one row from the current result set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum FetchStatus {
    /// A row was fetched; its columns are readable until the next fetch.
    Row,
    /// The result set is exhausted.
    NoMoreRows,
    /// The client's row buffer filled up.
    BufferFull,
    /// The fetch failed.
    Fail,
    /// The engine reported a code this protocol does not recognize.
    Other(i32),
}

/// Outcome of one engine-side column conversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum ConvertStatus {
    /// The destination buffer holds the converted value.
    Converted,
    /// The conversion failed.
    Failed,
    /// The source was a null pointer or carried a bad data type.
    BadData,
}

/// Login-time settings, applied before the connection is attempted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Login {
    pub username: String,
    pub password: String,
    pub character_set: Option<String>,
    pub language: Option<String>,
}

impl Login {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Login {
        Login {
            username: username.into(),
            password: password.into(),
            character_set: None,
            language: None,
        }
    }
}

/// A factory for connections to one kind of remote engine.
#[async_trait]
pub trait Driver: Send + Sync {
    type Conn: Connection;

    /// Connects to `server` (`host` or `host:port`) with the given login
    /// settings. The handler is session-scoped: the connection routes every
    /// diagnostic the engine produces to it for as long as it lives.
    async fn connect(
        &self,
        login: &Login,
        server: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self::Conn, DblibError>;
}

/// One live connection to a remote engine.
///
/// Columns are 1-indexed, following the wire protocol; the column accessors
/// panic when the index is 0 or past [`Connection::column_count`]. Raw
/// column data returned by [`Connection::data`] aliases the connection's
/// internal row buffer and is only valid until the next
/// [`Connection::fetch_row`] call; the borrow checker enforces exactly that
/// lifetime.
#[async_trait]
pub trait Connection: Send {
    /// Makes `database` the current database for the session.
    async fn select_database(&mut self, database: &str) -> Result<Retcode, DblibError>;

    /// Buffers `query` as the current command. Does not touch the network.
    fn set_command(&mut self, query: &str) -> Retcode;

    /// Executes the buffered command.
    async fn execute(&mut self) -> Result<Retcode, DblibError>;

    /// Requests the executed command's result set.
    async fn request_results(&mut self) -> Result<ResultsStatus, DblibError>;

    /// Fetches the next row of the current result set.
    async fn fetch_row(&mut self) -> Result<FetchStatus, DblibError>;

    /// The engine's post-execution row counter. How early this is populated
    /// is engine-dependent; callers treat it as an approximation. Negative
    /// means unknown.
    fn row_count(&self) -> i64;

    /// Number of columns in the current result set.
    fn column_count(&self) -> usize;

    /// Name of the given column, if the engine reported one.
    fn column_name(&self, column: usize) -> Option<&str>;

    /// Remote type tag of the given column.
    fn column_type(&self, column: usize) -> TypeTag;

    /// Length in bytes of the given column's data in the fetched row.
    fn data_len(&self, column: usize) -> usize;

    /// Raw data of the given column in the fetched row, absent when the
    /// value is NULL.
    fn data(&self, column: usize) -> Option<&[u8]>;

    /// Whether the engine can convert `from` into `to`.
    fn will_convert(&self, from: TypeTag, to: DestType) -> bool;

    /// Converts `data` (tagged `from`) into `to`, appending the result to
    /// `dest`. `dest` arrives with its capacity already reserved per the
    /// sizing rules in [`crate::convert_column`].
    fn convert(
        &self,
        from: TypeTag,
        data: &[u8],
        to: DestType,
        dest: &mut Vec<u8>,
    ) -> ConvertStatus;

    /// Closes the connection. Must be idempotent.
    async fn close(&mut self) -> Result<(), DblibError>;
}
