// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The production [`Driver`] backed by [`tiberius`].
//!
//! A dedicated task owns the `tiberius::Client` for each connection;
//! commands and owned row items flow over channels, which keeps the
//! connection usable from a plain `&mut` handle without tying the caller to
//! the lifetime of an in-flight query stream.
//!
//! Column data is materialized into an owned row buffer at fetch time:
//! character-class and binary-class columns surface their payload bytes,
//! other supported types (integers, floats, bits, GUIDs, numerics) are
//! rendered to their canonical text, and types the client library does not
//! surface in a renderable form come back as absent data, which the scan
//! layer treats as null. Informational messages below the error threshold
//! are not surfaced by the client library; severity-classified errors are
//! routed to the session's [`MessageHandler`] and cancel the in-flight
//! call.

use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use tiberius::{AuthMethod, Config, QueryItem};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, trace};

use crate::error::{DblibError, EngineMessage};
use crate::protocol::{
    Connection, ConvertStatus, DestType, Driver, FetchStatus, Login, ResultsStatus, Retcode,
    TypeTag,
};
use crate::session::MessageHandler;

type TdsClient = tiberius::Client<Compat<TcpStream>>;

/// The production driver: connects to a TDS engine over TCP.
#[derive(Clone, Copy, Debug, Default)]
pub struct TdsDriver;

impl TdsDriver {
    pub fn new() -> TdsDriver {
        TdsDriver
    }
}

#[async_trait]
impl Driver for TdsDriver {
    type Conn = TdsConnection;

    async fn connect(
        &self,
        login: &Login,
        server: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<TdsConnection, DblibError> {
        let mut config = Config::new();
        let (host, port) = split_server(server);
        config.host(host);
        if let Some(port) = port {
            config.port(port);
        }
        config.authentication(AuthMethod::sql_server(&login.username, &login.password));
        config.trust_cert();

        if login.character_set.is_some() {
            debug!("character_set is not configurable with this driver; ignoring");
        }
        if login.language.is_some() {
            debug!("language is not configurable with this driver; ignoring");
        }

        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|err| {
            DblibError::Connection(format!("failed to connect to {server}: {err}"))
        })?;
        tcp.set_nodelay(true).map_err(|err| {
            DblibError::Connection(format!("failed to configure connection to {server}: {err}"))
        })?;

        let client = tiberius::Client::connect(config, tcp.compat_write())
            .await
            .map_err(|err| match classify(err, &handler) {
                engine @ DblibError::Engine(_) => engine,
                other => DblibError::Connection(format!(
                    "failed to connect to {server} with user {}: {other}",
                    login.username
                )),
            })?;

        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        tokio::spawn(run_connection(client, cmd_rx, Arc::clone(&handler)));

        Ok(TdsConnection {
            cmd_tx,
            pending_command: None,
            columns: Vec::new(),
            items: None,
            pending: None,
            current: None,
            rows_seen: 0,
            closed: false,
        })
    }
}

/// `host` or `host:port`, the same connection-string shape the original
/// client library accepts.
fn split_server(server: &str) -> (&str, Option<u16>) {
    match server.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host, Some(port)),
            Err(_) => (server, None),
        },
        None => (server, None),
    }
}

struct ColumnMeta {
    name: String,
    tag: TypeTag,
}

struct OwnedRow {
    cells: Vec<Option<Vec<u8>>>,
}

enum Item {
    Metadata(Vec<ColumnMeta>),
    Row(OwnedRow),
}

enum Cmd {
    Query {
        sql: String,
        items: mpsc::Sender<Result<Item, DblibError>>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Routes a client-library error: severity-classified engine errors go
/// through the session handler and surface as [`DblibError::Engine`];
/// everything else is a transport-level execution failure.
fn classify(err: tiberius::error::Error, handler: &Arc<dyn MessageHandler>) -> DblibError {
    match err {
        tiberius::error::Error::Server(token) => {
            let non_empty = |s: &str| {
                if s.is_empty() {
                    None
                } else {
                    Some(s.to_string())
                }
            };
            let message = EngineMessage {
                number: token.code().into(),
                state: token.state().into(),
                severity: token.class().into(),
                message: token.message().to_string(),
                server: non_empty(token.server()),
                procedure: non_empty(token.procedure()),
                line: Some(token.line().into()),
            };
            handler.error(&message);
            DblibError::Engine(message)
        }
        other => DblibError::Execution(format!("client error: {other}")),
    }
}

async fn run_connection(
    mut client: TdsClient,
    mut commands: mpsc::Receiver<Cmd>,
    handler: Arc<dyn MessageHandler>,
) {
    while let Some(cmd) = commands.recv().await {
        match cmd {
            Cmd::Query { sql, items } => {
                trace!(%sql, "issuing query");
                let mut stream = match client.simple_query(&sql).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = items.send(Err(classify(err, &handler))).await;
                        continue;
                    }
                };
                // The stream is drained to completion even if the receiver
                // goes away, so the connection is ready for the next
                // command.
                let mut receiver_alive = true;
                loop {
                    let item = match stream.try_next().await {
                        Ok(Some(QueryItem::Metadata(meta))) => {
                            let columns = meta
                                .columns()
                                .iter()
                                .map(|c| ColumnMeta {
                                    name: c.name().to_string(),
                                    tag: type_tag(c.column_type()),
                                })
                                .collect();
                            Ok(Item::Metadata(columns))
                        }
                        Ok(Some(QueryItem::Row(row))) => Ok(Item::Row(to_owned_row(row))),
                        Ok(None) => break,
                        Err(err) => {
                            if receiver_alive {
                                let _ = items.send(Err(classify(err, &handler))).await;
                            }
                            break;
                        }
                    };
                    if receiver_alive && items.send(item).await.is_err() {
                        receiver_alive = false;
                    }
                }
            }
            Cmd::Close { done } => {
                let _ = client.close().await;
                let _ = done.send(());
                return;
            }
        }
    }
    // All handles dropped; closing the client tears down the socket.
    let _ = client.close().await;
}

fn type_tag(column_type: tiberius::ColumnType) -> TypeTag {
    use tiberius::ColumnType::*;
    match column_type {
        BigChar | NChar => TypeTag::Char,
        BigVarChar | NVarchar => TypeTag::VarChar,
        Text | NText => TypeTag::Text,
        BigBinary => TypeTag::Binary,
        BigVarBin => TypeTag::VarBinary,
        other => TypeTag::Other(other as i32),
    }
}

fn to_owned_row(row: tiberius::Row) -> OwnedRow {
    let cells = row.into_iter().map(render).collect();
    OwnedRow { cells }
}

/// Materializes one column's data: character and binary payloads pass
/// through, everything else renders to canonical text. `None` means the
/// value is absent (SQL NULL, or a type the client library does not
/// surface in renderable form).
fn render(data: tiberius::ColumnData<'_>) -> Option<Vec<u8>> {
    use tiberius::ColumnData::*;
    match data {
        String(value) => value.map(|s| s.into_owned().into_bytes()),
        Binary(value) => value.map(|b| b.into_owned()),
        U8(value) => value.map(|v| v.to_string().into_bytes()),
        I16(value) => value.map(|v| v.to_string().into_bytes()),
        I32(value) => value.map(|v| v.to_string().into_bytes()),
        I64(value) => value.map(|v| v.to_string().into_bytes()),
        F32(value) => value.map(|v| v.to_string().into_bytes()),
        F64(value) => value.map(|v| v.to_string().into_bytes()),
        Bit(value) => value.map(|v| if v { b"1".to_vec() } else { b"0".to_vec() }),
        Guid(value) => value.map(|v| v.to_string().into_bytes()),
        Numeric(value) => value.map(|v| v.to_string().into_bytes()),
        _ => None,
    }
}

/// One live connection to a TDS engine. Created by [`TdsDriver::connect`].
pub struct TdsConnection {
    cmd_tx: mpsc::Sender<Cmd>,
    pending_command: Option<String>,
    columns: Vec<ColumnMeta>,
    items: Option<mpsc::Receiver<Result<Item, DblibError>>>,
    pending: Option<OwnedRow>,
    current: Option<OwnedRow>,
    rows_seen: i64,
    closed: bool,
}

impl TdsConnection {
    async fn run_to_completion(&self, sql: String) -> Result<Retcode, DblibError> {
        let (tx, mut rx) = mpsc::channel(1);
        if self.cmd_tx.send(Cmd::Query { sql, items: tx }).await.is_err() {
            return Err(DblibError::Connection("connection task terminated".into()));
        }
        while let Some(item) = rx.recv().await {
            item?;
        }
        Ok(Retcode::Succeed)
    }
}

#[async_trait]
impl Connection for TdsConnection {
    async fn select_database(&mut self, database: &str) -> Result<Retcode, DblibError> {
        let sql = format!("USE [{}]", database.replace(']', "]]"));
        self.run_to_completion(sql).await
    }

    fn set_command(&mut self, query: &str) -> Retcode {
        self.pending_command = Some(query.to_string());
        Retcode::Succeed
    }

    async fn execute(&mut self) -> Result<Retcode, DblibError> {
        let Some(sql) = self.pending_command.take() else {
            return Ok(Retcode::Fail);
        };
        let (tx, rx) = mpsc::channel(1);
        if self.cmd_tx.send(Cmd::Query { sql, items: tx }).await.is_err() {
            return Err(DblibError::Connection("connection task terminated".into()));
        }
        self.items = Some(rx);
        self.columns.clear();
        self.pending = None;
        self.current = None;
        self.rows_seen = 0;
        Ok(Retcode::Succeed)
    }

    async fn request_results(&mut self) -> Result<ResultsStatus, DblibError> {
        let Some(items) = self.items.as_mut() else {
            return Ok(ResultsStatus::Fail);
        };
        match items.recv().await {
            Some(Ok(Item::Metadata(columns))) => {
                self.columns = columns;
                Ok(ResultsStatus::Succeed)
            }
            Some(Ok(Item::Row(row))) => {
                // Engines emit metadata before rows; tolerate the reverse
                // by holding the row for the first fetch.
                self.pending = Some(row);
                Ok(ResultsStatus::Succeed)
            }
            Some(Err(err)) => {
                self.items = None;
                Err(err)
            }
            None => {
                self.items = None;
                Ok(ResultsStatus::NoMoreResults)
            }
        }
    }

    async fn fetch_row(&mut self) -> Result<FetchStatus, DblibError> {
        if let Some(row) = self.pending.take() {
            self.current = Some(row);
            self.rows_seen += 1;
            return Ok(FetchStatus::Row);
        }
        let Some(items) = self.items.as_mut() else {
            return Ok(FetchStatus::Fail);
        };
        match items.recv().await {
            Some(Ok(Item::Row(row))) => {
                self.current = Some(row);
                self.rows_seen += 1;
                Ok(FetchStatus::Row)
            }
            Some(Ok(Item::Metadata(_))) => {
                // A further result set begins; only the first is walked.
                self.items = None;
                self.current = None;
                Ok(FetchStatus::NoMoreRows)
            }
            Some(Err(err)) => {
                self.items = None;
                self.current = None;
                Err(err)
            }
            None => {
                self.items = None;
                self.current = None;
                Ok(FetchStatus::NoMoreRows)
            }
        }
    }

    fn row_count(&self) -> i64 {
        self.rows_seen
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, column: usize) -> Option<&str> {
        self.columns.get(column - 1).map(|c| c.name.as_str())
    }

    fn column_type(&self, column: usize) -> TypeTag {
        self.columns[column - 1].tag
    }

    fn data_len(&self, column: usize) -> usize {
        self.current
            .as_ref()
            .and_then(|row| row.cells[column - 1].as_ref())
            .map_or(0, Vec::len)
    }

    fn data(&self, column: usize) -> Option<&[u8]> {
        self.current
            .as_ref()
            .and_then(|row| row.cells[column - 1].as_deref())
    }

    fn will_convert(&self, from: TypeTag, to: DestType) -> bool {
        matches!(
            (from, to),
            (TypeTag::Char | TypeTag::VarChar | TypeTag::Text, DestType::Char)
                | (TypeTag::Binary | TypeTag::VarBinary, DestType::Binary)
                | (TypeTag::Other(_), DestType::Char)
        )
    }

    fn convert(
        &self,
        _from: TypeTag,
        data: &[u8],
        _to: DestType,
        dest: &mut Vec<u8>,
    ) -> ConvertStatus {
        // Character payloads and pre-rendered text are byte-for-byte; binary
        // destinations take the payload as-is.
        dest.extend_from_slice(data);
        ConvertStatus::Converted
    }

    async fn close(&mut self) -> Result<(), DblibError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.items = None;
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Cmd::Close { done: tx }).await.is_ok() {
            let _ = rx.await;
        }
        Ok(())
    }
}
