// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! DB-Library-style session protocol driver for TDS databases.
//!
//! This crate models the classic DB-Library connection/command/result
//! protocol as a pair of traits, [`Driver`] and [`Connection`], and provides
//! the pieces a caller needs to drive them:
//!
//! * [`ConnectionConfig`], the validated connection settings for one session.
//! * [`Session`], which owns the login settings and the live connection for
//!   exactly one logical operation and guarantees release on every exit path.
//! * [`convert_column`], the per-column translation from the remote type
//!   system to local text or binary values.
//! * [`client::TdsDriver`], the production driver backed by [`tiberius`].
//! * [`mock::MockEngine`], a scriptable in-memory engine for tests.
//!
//! Sessions are deliberately cheap and short-lived: one session per planning
//! estimate or per scan, never pooled or shared.

mod config;
pub use config::{ConnectionConfig, QuerySource, DEFAULT_SERVERNAME};

mod convert;
pub use convert::{convert_column, CellValue, OTHER_DEST_CAPACITY};

mod error;
pub use error::{DblibError, EngineMessage};

mod protocol;
pub use protocol::{
    Connection, ConvertStatus, DestType, Driver, FetchStatus, Login, ResultsStatus, Retcode,
    TypeTag,
};

mod session;
pub use session::{LogHandler, MessageHandler, Session};

pub mod client;
pub mod mock;
