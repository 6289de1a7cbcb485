// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The scan-time row stream.
//!
//! A [`ForeignScan`] owns one session for the duration of one scan. The
//! first pull submits and executes the query and acquires its result set;
//! each subsequent pull fetches exactly one row and converts every column.
//! Reaching the end of the result set is terminal: further pulls are no-ops
//! that keep reporting end-of-data without touching the connection.

use std::sync::Arc;

use tracing::{debug, trace};

use tds_dblib::{
    convert_column, CellValue, ConnectionConfig, Connection, DblibError, Driver, FetchStatus,
    MessageHandler, ResultsStatus, Session,
};

/// Where a scan is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanPhase {
    /// No pull has happened yet; the query has not been executed.
    NotStarted,
    /// The result set is open and rows are being fetched.
    Streaming,
    /// The result set is exhausted. Terminal.
    Exhausted,
}

/// One row of converted column values, in result-set order. `None` marks a
/// null column. The caller owns the final typed materialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    values: Vec<Option<CellValue>>,
}

impl Row {
    pub fn values(&self) -> &[Option<CellValue>] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Option<CellValue>> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Scan state for one execution of a foreign scan.
pub struct ForeignScan<C: Connection> {
    session: Session<C>,
    query: String,
    phase: ScanPhase,
    rows_fetched: u64,
}

impl<C: Connection> std::fmt::Debug for ForeignScan<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignScan")
            .field("session", &self.session)
            .field("query", &self.query)
            .field("rows_fetched", &self.rows_fetched)
            .finish()
    }
}

impl<C: Connection> ForeignScan<C> {
    /// Opens the scan's own session. No command is sent until the first
    /// [`ForeignScan::next_row`] call.
    pub async fn begin<D>(
        driver: &D,
        config: &ConnectionConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<ForeignScan<C>, DblibError>
    where
        D: Driver<Conn = C> + ?Sized,
    {
        let query = config.effective_query();
        let session = Session::open(driver, config, handler).await?;
        Ok(ForeignScan {
            session,
            query,
            phase: ScanPhase::NotStarted,
            rows_fetched: 0,
        })
    }

    /// Pulls the next row, or `None` once the result set is exhausted.
    ///
    /// The first pull executes the query; a command that yields no result
    /// set at all is fatal here, unlike during planning, because a scan
    /// source is expected to produce one.
    pub async fn next_row(&mut self) -> Result<Option<Row>, DblibError> {
        match self.phase {
            ScanPhase::Exhausted => {
                trace!("scan already exhausted");
                return Ok(None);
            }
            ScanPhase::NotStarted => {
                debug!(query = %self.query, "first pull; executing query");
                match self.session.submit(&self.query).await? {
                    ResultsStatus::Succeed => {}
                    ResultsStatus::NoMoreResults => {
                        return Err(DblibError::Execution(format!(
                            "there appear to be no results from query {}",
                            self.query
                        )));
                    }
                    ResultsStatus::Fail => {
                        return Err(DblibError::Execution(format!(
                            "failed to get results from query {}",
                            self.query
                        )));
                    }
                    ResultsStatus::Other(code) => {
                        return Err(DblibError::Execution(format!(
                            "unknown return code {code} getting results from query {}",
                            self.query
                        )));
                    }
                }
                self.phase = ScanPhase::Streaming;
            }
            ScanPhase::Streaming => {}
        }

        let conn = self.session.conn()?;
        match conn.fetch_row().await? {
            FetchStatus::Row => {
                self.rows_fetched += 1;
                trace!(row = self.rows_fetched, "row fetched");
                let row = read_row(conn)?;
                Ok(Some(row))
            }
            FetchStatus::NoMoreRows => {
                debug!(rows = self.rows_fetched, "no more rows");
                self.phase = ScanPhase::Exhausted;
                Ok(None)
            }
            FetchStatus::BufferFull => Err(DblibError::Execution(
                "buffer filled up during query".into(),
            )),
            FetchStatus::Fail => Err(DblibError::Execution(
                "failed to get row during query".into(),
            )),
            FetchStatus::Other(code) => Err(DblibError::Execution(format!(
                "failed to get row during query: unknown return code {code}"
            ))),
        }
    }

    /// Number of rows returned so far.
    pub fn rows_fetched(&self) -> u64 {
        self.rows_fetched
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    /// Restarting a scan in place is not supported; callers start a fresh
    /// scan instead.
    pub fn re_scan(&mut self) {
        debug!("re_scan requested; not supported, start a fresh scan instead");
    }

    /// No supplemental plan information is emitted.
    pub fn explain(&self) -> Option<Vec<(String, String)>> {
        None
    }

    /// Ends the scan and releases its session. Also safe on scans whose
    /// first pull never happened or failed.
    pub async fn end(mut self) -> Result<(), DblibError> {
        self.session.close().await
    }
}

/// Reads every column of the just-fetched row. Columns are 1-indexed on
/// the wire. A zero-length or absent value is null without a conversion
/// attempt; conversion failures degrade to null per [`convert_column`].
fn read_row<C: Connection>(conn: &C) -> Result<Row, DblibError> {
    let column_count = conn.column_count();
    let mut values = Vec::with_capacity(column_count);
    for column in 1..=column_count {
        let tag = conn.column_type(column);
        let len = conn.data_len(column);
        let value = if len == 0 {
            trace!(column, "column value is NULL");
            None
        } else {
            match conn.data(column) {
                None => {
                    trace!(column, "column value pointer is NULL, but probably shouldn't be");
                    None
                }
                Some(data) => convert_column(conn, tag, data)?,
            }
        };
        values.push(value);
    }
    Ok(Row { values })
}
