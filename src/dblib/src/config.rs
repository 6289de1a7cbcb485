// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Connection settings for one remote session.

use serde::{Deserialize, Serialize};

/// Address used when no server name is configured.
pub const DEFAULT_SERVERNAME: &str = "127.0.0.1";

/// What a session will run on the remote engine: a user-supplied command or
/// a table name from which a `SELECT *` is synthesized.
///
/// Exactly one of the two is ever configured; the enum makes supplying both
/// unrepresentable. Supplying neither is rejected during option resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuerySource {
    /// A complete command, sent verbatim.
    Query(String),
    /// A table name; the effective query becomes `SELECT * FROM <table>`.
    Table(String),
}

/// Configuration for one remote session.
///
/// Built once per planning estimate or scan, immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    servername: String,
    language: Option<String>,
    character_set: Option<String>,
    port: Option<u16>,
    username: String,
    password: String,
    database: Option<String>,
    source: QuerySource,
}

impl ConnectionConfig {
    /// Constructs a new `ConnectionConfig` targeting [`DEFAULT_SERVERNAME`].
    pub fn new<U, P>(username: U, password: P, source: QuerySource) -> ConnectionConfig
    where
        U: Into<String>,
        P: Into<String>,
    {
        ConnectionConfig {
            servername: DEFAULT_SERVERNAME.into(),
            language: None,
            character_set: None,
            port: None,
            username: username.into(),
            password: password.into(),
            database: None,
            source,
        }
    }

    /// Sets the server to connect to.
    pub fn with_servername(mut self, servername: impl Into<String>) -> ConnectionConfig {
        self.servername = servername.into();
        self
    }

    /// Sets the TCP port, appended to the server address at connect time.
    pub fn with_port(mut self, port: u16) -> ConnectionConfig {
        self.port = Some(port);
        self
    }

    /// Sets the national language for the session.
    pub fn with_language(mut self, language: impl Into<String>) -> ConnectionConfig {
        self.language = Some(language.into());
        self
    }

    /// Sets the client character set for the session.
    pub fn with_character_set(mut self, character_set: impl Into<String>) -> ConnectionConfig {
        self.character_set = Some(character_set.into());
        self
    }

    /// Sets the database to select after connecting.
    pub fn with_database(mut self, database: impl Into<String>) -> ConnectionConfig {
        self.database = Some(database.into());
        self
    }

    pub fn servername(&self) -> &str {
        &self.servername
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn character_set(&self) -> Option<&str> {
        self.character_set.as_deref()
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn source(&self) -> &QuerySource {
        &self.source
    }

    /// The connection string handed to the driver: `host` or `host:port`.
    pub fn addr(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.servername, port),
            None => self.servername.clone(),
        }
    }

    /// The command text sent to the remote engine.
    pub fn effective_query(&self) -> String {
        match &self.source {
            QuerySource::Query(query) => query.clone(),
            QuerySource::Table(table) => format!("SELECT * FROM {table}"),
        }
    }
}
