// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! A scriptable in-memory engine implementing the protocol traits.
//!
//! Tests configure a [`MockEngine`] with columns, rows, and failure
//! injections, hand a [`MockDriver`] to the code under test, and afterwards
//! inspect what happened: how many connections were opened and closed,
//! which commands were executed, and which conversions were requested with
//! what destination sizing.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{DblibError, EngineMessage};
use crate::protocol::{
    Connection, ConvertStatus, DestType, Driver, FetchStatus, Login, ResultsStatus, Retcode,
    TypeTag,
};
use crate::session::MessageHandler;

/// One recorded call to [`Connection::convert`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConvertCall {
    pub from: TypeTag,
    pub to: DestType,
    /// Capacity of the destination buffer as handed to the engine.
    pub capacity: usize,
}

enum ScriptedFetch {
    Row(Vec<Option<Vec<u8>>>),
    Code(FetchStatus),
    Error(EngineMessage),
}

#[derive(Default)]
struct State {
    connect_error: Option<String>,
    fail_database: bool,
    fail_set_command: bool,
    fail_execute: bool,
    results_status: Option<ResultsStatus>,
    columns: Vec<(String, TypeTag)>,
    fetches: VecDeque<ScriptedFetch>,
    row_count: Option<i64>,
    scripted_rows: i64,
    notices: Vec<EngineMessage>,
    unconvertible: HashSet<(TypeTag, DestType)>,
    forced_convert: Option<ConvertStatus>,
    convert_calls: Vec<ConvertCall>,
    opens: usize,
    closes: usize,
    executed: Vec<String>,
    databases_selected: Vec<String>,
}

/// The shared scripted engine. Clone the [`Arc`] to keep an inspection
/// handle while the driver owns another.
#[derive(Default)]
pub struct MockEngine {
    state: Mutex<State>,
}

impl MockEngine {
    pub fn new() -> Arc<MockEngine> {
        Arc::new(MockEngine::default())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("mock engine state poisoned")
    }

    /// Makes every connect attempt fail with the given detail.
    pub fn fail_connect(&self, message: &str) {
        self.state().connect_error = Some(message.to_string());
    }

    /// Makes database selection report failure.
    pub fn fail_database(&self) {
        self.state().fail_database = true;
    }

    /// Makes command buffering report failure.
    pub fn fail_set_command(&self) {
        self.state().fail_set_command = true;
    }

    /// Makes command execution report failure.
    pub fn fail_execute(&self) {
        self.state().fail_execute = true;
    }

    /// Overrides the outcome of requesting a result set. The default is
    /// [`ResultsStatus::Succeed`].
    pub fn set_results_status(&self, status: ResultsStatus) {
        self.state().results_status = Some(status);
    }

    /// Declares the result set's columns. Must be configured before the
    /// connection under test is opened.
    pub fn set_columns(&self, columns: &[(&str, TypeTag)]) {
        self.state().columns = columns
            .iter()
            .map(|(name, tag)| (name.to_string(), *tag))
            .collect();
    }

    /// Appends a data row to the fetch script.
    pub fn push_row(&self, cells: Vec<Option<Vec<u8>>>) {
        let mut state = self.state();
        state.scripted_rows += 1;
        state.fetches.push_back(ScriptedFetch::Row(cells));
    }

    /// Appends a bare fetch status (e.g. [`FetchStatus::BufferFull`] or an
    /// unrecognized code) to the fetch script.
    pub fn push_fetch_code(&self, code: FetchStatus) {
        self.state().fetches.push_back(ScriptedFetch::Code(code));
    }

    /// Appends a severity-classified engine error to the fetch script; it
    /// is routed through the session's handler and cancels the fetch.
    pub fn push_engine_error(&self, message: EngineMessage) {
        self.state()
            .fetches
            .push_back(ScriptedFetch::Error(message));
    }

    /// Overrides the engine's post-execution row counter. Without an
    /// override the counter reports the number of scripted rows.
    pub fn set_row_count(&self, count: i64) {
        self.state().row_count = Some(count);
    }

    /// Emits the given notice through the session handler on every execute.
    pub fn add_notice(&self, message: EngineMessage) {
        self.state().notices.push(message);
    }

    /// Declares a source/destination pair the engine cannot convert.
    pub fn mark_unconvertible(&self, from: TypeTag, to: DestType) {
        self.state().unconvertible.insert((from, to));
    }

    /// Forces every conversion call to report the given status.
    pub fn force_convert_status(&self, status: ConvertStatus) {
        self.state().forced_convert = Some(status);
    }

    /// All conversion calls made so far, in order.
    pub fn convert_calls(&self) -> Vec<ConvertCall> {
        self.state().convert_calls.clone()
    }

    /// Number of connections opened.
    pub fn opens(&self) -> usize {
        self.state().opens
    }

    /// Number of connections released, whether by explicit close or drop.
    pub fn closes(&self) -> usize {
        self.state().closes
    }

    /// Commands executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    /// Databases selected so far, in order.
    pub fn databases_selected(&self) -> Vec<String> {
        self.state().databases_selected.clone()
    }

    /// How much of the fetch script has not been consumed.
    pub fn scripted_fetches_remaining(&self) -> usize {
        self.state().fetches.len()
    }
}

/// [`Driver`] over a shared [`MockEngine`].
pub struct MockDriver {
    engine: Arc<MockEngine>,
}

impl MockDriver {
    pub fn new(engine: Arc<MockEngine>) -> MockDriver {
        MockDriver { engine }
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Conn = MockConnection;

    async fn connect(
        &self,
        _login: &Login,
        _server: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<MockConnection, DblibError> {
        let columns = {
            let mut state = self.engine.state();
            if let Some(message) = &state.connect_error {
                return Err(DblibError::Connection(message.clone()));
            }
            state.opens += 1;
            state.columns.clone()
        };
        Ok(MockConnection {
            engine: Arc::clone(&self.engine),
            handler,
            columns,
            command: None,
            current: None,
            closed: false,
        })
    }
}

/// One scripted connection. Created by [`MockDriver::connect`].
pub struct MockConnection {
    engine: Arc<MockEngine>,
    handler: Arc<dyn MessageHandler>,
    columns: Vec<(String, TypeTag)>,
    command: Option<String>,
    current: Option<Vec<Option<Vec<u8>>>>,
    closed: bool,
}

impl MockConnection {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.engine.state().closes += 1;
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn select_database(&mut self, database: &str) -> Result<Retcode, DblibError> {
        let mut state = self.engine.state();
        if state.fail_database {
            return Ok(Retcode::Fail);
        }
        state.databases_selected.push(database.to_string());
        Ok(Retcode::Succeed)
    }

    fn set_command(&mut self, query: &str) -> Retcode {
        if self.engine.state().fail_set_command {
            return Retcode::Fail;
        }
        self.command = Some(query.to_string());
        Retcode::Succeed
    }

    async fn execute(&mut self) -> Result<Retcode, DblibError> {
        let Some(command) = self.command.take() else {
            return Ok(Retcode::Fail);
        };
        let notices = {
            let mut state = self.engine.state();
            if state.fail_execute {
                return Ok(Retcode::Fail);
            }
            state.executed.push(command);
            state.notices.clone()
        };
        for notice in &notices {
            self.handler.notice(notice);
        }
        Ok(Retcode::Succeed)
    }

    async fn request_results(&mut self) -> Result<ResultsStatus, DblibError> {
        Ok(self
            .engine
            .state()
            .results_status
            .unwrap_or(ResultsStatus::Succeed))
    }

    async fn fetch_row(&mut self) -> Result<FetchStatus, DblibError> {
        let scripted = self.engine.state().fetches.pop_front();
        match scripted {
            Some(ScriptedFetch::Row(cells)) => {
                self.current = Some(cells);
                Ok(FetchStatus::Row)
            }
            Some(ScriptedFetch::Code(code)) => {
                self.current = None;
                Ok(code)
            }
            Some(ScriptedFetch::Error(message)) => {
                self.current = None;
                self.handler.error(&message);
                Err(DblibError::Engine(message))
            }
            None => {
                self.current = None;
                Ok(FetchStatus::NoMoreRows)
            }
        }
    }

    fn row_count(&self) -> i64 {
        let state = self.engine.state();
        state.row_count.unwrap_or(state.scripted_rows)
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, column: usize) -> Option<&str> {
        self.columns.get(column - 1).map(|(name, _)| name.as_str())
    }

    fn column_type(&self, column: usize) -> TypeTag {
        self.columns[column - 1].1
    }

    fn data_len(&self, column: usize) -> usize {
        self.current
            .as_ref()
            .and_then(|cells| cells[column - 1].as_ref())
            .map_or(0, Vec::len)
    }

    fn data(&self, column: usize) -> Option<&[u8]> {
        self.current
            .as_ref()
            .and_then(|cells| cells[column - 1].as_deref())
    }

    fn will_convert(&self, from: TypeTag, to: DestType) -> bool {
        !self.engine.state().unconvertible.contains(&(from, to))
    }

    fn convert(
        &self,
        from: TypeTag,
        data: &[u8],
        to: DestType,
        dest: &mut Vec<u8>,
    ) -> ConvertStatus {
        let mut state = self.engine.state();
        state.convert_calls.push(ConvertCall {
            from,
            to,
            capacity: dest.capacity(),
        });
        if let Some(status) = state.forced_convert {
            return status;
        }
        dest.extend_from_slice(data);
        ConvertStatus::Converted
    }

    async fn close(&mut self) -> Result<(), DblibError> {
        self.release();
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.release();
    }
}
