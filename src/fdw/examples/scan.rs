// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Example of planning and scanning a foreign table against the scriptable
//! in-memory engine, end to end: option resolution, relation sizing, path
//! costing, and the row stream.
//!
//! Run with `RUST_LOG=debug` to watch the session lifecycle.

use std::sync::Arc;

use tds_dblib::mock::{MockDriver, MockEngine};
use tds_dblib::TypeTag;
use tds_fdw::{MemoryCatalog, TableId, TdsFdw};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let engine = MockEngine::new();
    engine.set_columns(&[("id", TypeTag::Other(56)), ("name", TypeTag::VarChar)]);
    engine.push_row(vec![Some(b"1".to_vec()), Some(b"ann".to_vec())]);
    engine.push_row(vec![Some(b"2".to_vec()), Some(b"bob".to_vec())]);
    engine.push_row(vec![Some(b"3".to_vec()), None]);
    engine.set_row_count(3);

    let mut catalog = MemoryCatalog::new();
    let table = TableId(1);
    catalog.register(
        table,
        &[("table", "employees")],
        &[],
        &[("username", "scott"), ("password", "tiger")],
    );

    let fdw = TdsFdw::new(MockDriver::new(Arc::clone(&engine)));

    let rows = fdw.relation_size(&catalog, table).await?;
    let costs = fdw.paths(&catalog, table, rows)?;
    tracing::info!(rows, startup = costs.startup_cost, total = costs.total_cost, "planned");

    let mut scan = fdw.begin_scan(&catalog, table).await?;
    while let Some(row) = scan.next_row().await? {
        tracing::info!("row: {:?}", row.values());
    }
    scan.end().await?;

    Ok(())
}
