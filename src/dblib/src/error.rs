// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Error types for session setup, command execution, and row streaming.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A diagnostic reported by the remote engine, either an informational
/// notice or a severity-classified error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMessage {
    /// Engine-assigned message number.
    pub number: i64,
    /// Engine-assigned message state.
    pub state: i32,
    /// Severity level; the transport decides which levels are fatal.
    pub severity: i32,
    /// Message text.
    pub message: String,
    /// Name of the server that produced the message, when reported.
    pub server: Option<String>,
    /// Name of the stored procedure that produced the message, when reported.
    pub procedure: Option<String>,
    /// Line number within the command batch, when reported.
    pub line: Option<u64>,
}

impl EngineMessage {
    /// Constructs a message with the given number, severity, and text.
    pub fn new(number: i64, severity: i32, message: impl Into<String>) -> EngineMessage {
        EngineMessage {
            number,
            state: 0,
            severity,
            message: message.into(),
            server: None,
            procedure: None,
            line: None,
        }
    }
}

impl fmt::Display for EngineMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Msg #: {}, Msg state: {}, Level: {}, Msg: {}",
            self.number, self.state, self.severity, self.message
        )?;
        if let Some(server) = &self.server {
            write!(f, ", Server: {server}")?;
        }
        if let Some(procedure) = &self.procedure {
            write!(f, ", Process: {procedure}")?;
        }
        if let Some(line) = self.line {
            write!(f, ", Line: {line}")?;
        }
        Ok(())
    }
}

/// Errors arising while configuring, opening, or driving a session.
///
/// All variants are fatal to the operation (estimate or scan) that raised
/// them and are never retried. Per-column conversion failures are not
/// errors; they degrade to null values (see [`crate::convert_column`]).
#[derive(Debug, thiserror::Error)]
pub enum DblibError {
    /// Invalid or conflicting options, detected before any I/O.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Failed to establish or tear down a session.
    #[error("connection error: {0}")]
    Connection(String),
    /// Failed to submit, execute, or walk the results of a command.
    #[error("execution error: {0}")]
    Execution(String),
    /// A severity-classified error reported by the remote engine. The
    /// in-flight call was cancelled before this surfaced.
    #[error("remote engine error: {0}")]
    Engine(EngineMessage),
    /// Buffer or state allocation failed.
    #[error("out of memory: {0}")]
    OutOfMemory(String),
}
