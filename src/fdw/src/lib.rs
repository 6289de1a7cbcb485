// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Read-only foreign-data-wrapper core for TDS databases.
//!
//! This crate translates between a relational planner/executor's callback
//! contract and the DB-Library-style session protocol provided by
//! [`tds_dblib`]. The host supplies per-table options through an
//! [`OptionCatalog`]; this crate resolves them, estimates relation sizes
//! and scan costs for the planner, and streams result rows back one at a
//! time during execution.
//!
//! Planning and scanning never share a session: the estimate opens and
//! closes its own throwaway session, and every scan owns another,
//! trading a doubled connection setup for statelessness.
//!
//! ```no_run
//! # async fn example() -> Result<(), tds_dblib::DblibError> {
//! use tds_dblib::client::TdsDriver;
//! use tds_fdw::{MemoryCatalog, TableId, TdsFdw};
//!
//! let mut catalog = MemoryCatalog::new();
//! let table = TableId(1);
//! catalog.register(
//!     table,
//!     &[("table", "employees")],
//!     &[("servername", "db.example.com"), ("port", "1433")],
//!     &[("username", "scott"), ("password", "tiger")],
//! );
//!
//! let fdw = TdsFdw::new(TdsDriver::new());
//! let rows = fdw.relation_size(&catalog, table).await?;
//! let costs = fdw.paths(&catalog, table, rows)?;
//!
//! let mut scan = fdw.begin_scan(&catalog, table).await?;
//! while let Some(row) = scan.next_row().await? {
//!     // Hand the string-encoded values to the tuple materializer.
//!     let _ = row.values();
//! }
//! scan.end().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tds_dblib::{ConnectionConfig, DblibError, Driver, LogHandler, MessageHandler};

mod options;
pub use options::{resolve_options, validate_options, OptionContext, VALID_OPTIONS};

mod estimate;
pub use estimate::{estimate_relation, startup_cost, Estimate, REMOTE_STARTUP_COST};

mod scan;
pub use scan::{ForeignScan, Row, ScanPhase};

/// Identifies one foreign table to the host's catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub u64);

/// The host's option storage, queried per table. The three layers mirror
/// the catalog objects options can be attached to.
pub trait OptionCatalog {
    fn table_options(&self, table: TableId) -> Vec<(String, String)>;
    fn server_options(&self, table: TableId) -> Vec<(String, String)>;
    fn user_mapping_options(&self, table: TableId) -> Vec<(String, String)>;
}

#[derive(Default)]
struct CatalogEntry {
    table_options: Vec<(String, String)>,
    server_options: Vec<(String, String)>,
    user_mapping_options: Vec<(String, String)>,
}

/// An in-memory [`OptionCatalog`] for tests and embedding hosts without
/// catalog storage of their own.
#[derive(Default)]
pub struct MemoryCatalog {
    tables: BTreeMap<TableId, CatalogEntry>,
}

impl MemoryCatalog {
    pub fn new() -> MemoryCatalog {
        MemoryCatalog::default()
    }

    /// Registers (or replaces) the three option layers for a table.
    pub fn register(
        &mut self,
        table: TableId,
        table_options: &[(&str, &str)],
        server_options: &[(&str, &str)],
        user_mapping_options: &[(&str, &str)],
    ) {
        let owned = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect()
        };
        self.tables.insert(
            table,
            CatalogEntry {
                table_options: owned(table_options),
                server_options: owned(server_options),
                user_mapping_options: owned(user_mapping_options),
            },
        );
    }
}

impl OptionCatalog for MemoryCatalog {
    fn table_options(&self, table: TableId) -> Vec<(String, String)> {
        self.tables
            .get(&table)
            .map(|entry| entry.table_options.clone())
            .unwrap_or_default()
    }

    fn server_options(&self, table: TableId) -> Vec<(String, String)> {
        self.tables
            .get(&table)
            .map(|entry| entry.server_options.clone())
            .unwrap_or_default()
    }

    fn user_mapping_options(&self, table: TableId) -> Vec<(String, String)> {
        self.tables
            .get(&table)
            .map(|entry| entry.user_mapping_options.clone())
            .unwrap_or_default()
    }
}

/// The foreign-data-wrapper callback surface over one [`Driver`].
///
/// Each method corresponds to one host callback: `relation_size` and
/// `paths` serve the planner, `begin_scan` opens execution state whose
/// remaining callbacks ([`ForeignScan::next_row`], [`ForeignScan::re_scan`],
/// [`ForeignScan::explain`], [`ForeignScan::end`]) live on the scan itself.
pub struct TdsFdw<D: Driver> {
    driver: D,
    handler: Arc<dyn MessageHandler>,
}

impl<D: Driver> TdsFdw<D> {
    /// Creates the wrapper with the default diagnostic handler, which logs
    /// engine notices and errors.
    pub fn new(driver: D) -> TdsFdw<D> {
        TdsFdw::with_handler(driver, Arc::new(LogHandler))
    }

    /// Creates the wrapper with a custom diagnostic handler. The handler is
    /// passed to every session this wrapper opens.
    pub fn with_handler(driver: D, handler: Arc<dyn MessageHandler>) -> TdsFdw<D> {
        TdsFdw { driver, handler }
    }

    fn resolve(
        &self,
        catalog: &impl OptionCatalog,
        table: TableId,
    ) -> Result<ConnectionConfig, DblibError> {
        resolve_options(
            &catalog.table_options(table),
            &catalog.server_options(table),
            &catalog.user_mapping_options(table),
        )
    }

    /// Estimated row count for the table, for the planner's relation
    /// sizing. Runs the configured query on a throwaway session.
    pub async fn relation_size(
        &self,
        catalog: &impl OptionCatalog,
        table: TableId,
    ) -> Result<u64, DblibError> {
        let config = self.resolve(catalog, table)?;
        let estimate = estimate_relation(&self.driver, &config, Arc::clone(&self.handler)).await?;
        Ok(estimate.rows)
    }

    /// Costs for the single access path this wrapper offers. Re-resolves
    /// options and derives costs from the row count the planner already
    /// obtained; no connection is made.
    pub fn paths(
        &self,
        catalog: &impl OptionCatalog,
        table: TableId,
        rows: u64,
    ) -> Result<Estimate, DblibError> {
        let config = self.resolve(catalog, table)?;
        let startup_cost = startup_cost(&config);
        Ok(Estimate {
            rows,
            startup_cost,
            total_cost: rows as f64 + startup_cost,
        })
    }

    /// Opens scan state for one execution of a foreign scan.
    pub async fn begin_scan(
        &self,
        catalog: &impl OptionCatalog,
        table: TableId,
    ) -> Result<ForeignScan<D::Conn>, DblibError> {
        let config = self.resolve(catalog, table)?;
        ForeignScan::begin(&self.driver, &config, Arc::clone(&self.handler)).await
    }

    /// Whether this wrapper supports gathering statistics for `ANALYZE`.
    /// It does not.
    pub fn analyze(&self) -> bool {
        false
    }
}
