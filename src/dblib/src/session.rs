// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Session lifecycle: open, drive, and reliably release one connection.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::error::{DblibError, EngineMessage};
use crate::protocol::{Connection, Driver, Login, ResultsStatus, Retcode};

/// Observer for diagnostics the remote engine emits during a session.
///
/// Two severities, two routes: [`MessageHandler::notice`] is purely
/// informational and never interrupts anything, while
/// [`MessageHandler::error`] accompanies cancellation of the in-flight call
/// and a fatal [`DblibError::Engine`] to the caller.
///
/// The handler is a property of the session, passed to the driver at open
/// time, so concurrent sessions never share observer state.
pub trait MessageHandler: Send + Sync {
    /// An informational notice arrived.
    fn notice(&self, message: &EngineMessage);

    /// A severity-classified error arrived; the in-flight call is being
    /// cancelled.
    fn error(&self, message: &EngineMessage);
}

/// The default [`MessageHandler`]: forwards diagnostics to [`tracing`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LogHandler;

impl MessageHandler for LogHandler {
    fn notice(&self, message: &EngineMessage) {
        tracing::info!(%message, "remote engine notice");
    }

    fn error(&self, message: &EngineMessage) {
        tracing::warn!(%message, "remote engine error");
    }
}

/// One open session: the login settings and connection handle pair, owned
/// exclusively by a single planning estimate or scan.
///
/// `close` is explicit and idempotent; anything still held when the session
/// is dropped is released by the connection's own teardown, so early-error
/// exits cannot leak handles.
pub struct Session<C: Connection> {
    conn: Option<C>,
    server: String,
}

impl<C: Connection> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.conn.is_some())
            .field("server", &self.server)
            .finish()
    }
}

impl<C: Connection> Session<C> {
    /// Opens a session per `config`: applies the login settings, connects
    /// to the rendered `host[:port]` address, and selects the configured
    /// database when present.
    ///
    /// On any failure the partially-established connection is released
    /// before the error is returned.
    pub async fn open<D>(
        driver: &D,
        config: &ConnectionConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Session<C>, DblibError>
    where
        D: Driver<Conn = C> + ?Sized,
    {
        let login = Login {
            username: config.username().to_string(),
            password: config.password().to_string(),
            character_set: config.character_set().map(String::from),
            language: config.language().map(String::from),
        };
        let server = config.addr();

        debug!(%server, username = %login.username, "connecting to remote engine");
        let mut conn = driver.connect(&login, &server, handler).await?;
        debug!(%server, "connected");

        if let Some(database) = config.database() {
            debug!(%database, "selecting database");
            let selected = match conn.select_database(database).await {
                Ok(Retcode::Succeed) => Ok(()),
                Ok(Retcode::Fail) => Err(DblibError::Connection(format!(
                    "failed to select database {database}"
                ))),
                Err(err) => Err(err),
            };
            if let Err(err) = selected {
                if let Err(close_err) = conn.close().await {
                    warn!(%server, "failed to close connection after error: {close_err}");
                }
                return Err(err);
            }
        }

        Ok(Session {
            conn: Some(conn),
            server,
        })
    }

    /// The live connection.
    ///
    /// Fails if the session has already been closed.
    pub fn conn(&mut self) -> Result<&mut C, DblibError> {
        self.conn
            .as_mut()
            .ok_or_else(|| DblibError::Connection("session already closed".into()))
    }

    /// Submits `query` as the current command, executes it, and requests
    /// its result set.
    pub async fn submit(&mut self, query: &str) -> Result<ResultsStatus, DblibError> {
        let conn = self.conn()?;

        debug!(%query, "setting database command");
        if let Retcode::Fail = conn.set_command(query) {
            return Err(DblibError::Execution(format!(
                "failed to set current query to {query}"
            )));
        }

        debug!("executing the query");
        if let Retcode::Fail = conn.execute().await? {
            return Err(DblibError::Execution(format!(
                "failed to execute query {query}"
            )));
        }

        conn.request_results().await
    }

    /// Releases the connection. Safe to call more than once and on
    /// sessions that never finished opening.
    pub async fn close(&mut self) -> Result<(), DblibError> {
        if let Some(mut conn) = self.conn.take() {
            debug!(server = %self.server, "closing session");
            conn.close().await?;
        }
        Ok(())
    }
}

impl<C: Connection> Drop for Session<C> {
    fn drop(&mut self) {
        // The connection's own teardown releases the handle; this is only
        // worth a note because callers normally close explicitly.
        if self.conn.is_some() {
            debug!(server = %self.server, "session dropped without explicit close");
        }
    }
}
