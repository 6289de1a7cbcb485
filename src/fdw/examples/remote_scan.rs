// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Example of scanning a table on a real SQL Server instance.
//!
//! To run this example:
//!   1. Get the latest SQL Server Docker image:
//!      <https://hub.docker.com/r/microsoft/mssql-server>.
//!   2. Create a table to read:
//!     ```
//!     > CREATE TABLE employees (id int, name varchar(40));
//!     > INSERT INTO employees VALUES (1, 'ann'), (2, 'bob');
//!     ```
//!   3. Point the example at the server:
//!     ```
//!     TDS_SERVER=localhost TDS_PORT=1433 TDS_USERNAME=SA \
//!         TDS_PASSWORD='password123?' TDS_TABLE=employees \
//!         cargo run --example remote_scan
//!     ```

use std::env;

use tds_dblib::client::TdsDriver;
use tds_fdw::{MemoryCatalog, TableId, TdsFdw};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let server = env::var("TDS_SERVER").unwrap_or_else(|_| "localhost".into());
    let port = env::var("TDS_PORT").unwrap_or_else(|_| "1433".into());
    let username = env::var("TDS_USERNAME").unwrap_or_else(|_| "SA".into());
    let password = env::var("TDS_PASSWORD").unwrap_or_default();
    let table_name = env::var("TDS_TABLE").unwrap_or_else(|_| "employees".into());

    let mut catalog = MemoryCatalog::new();
    let table = TableId(1);
    catalog.register(
        table,
        &[("table", table_name.as_str())],
        &[("servername", server.as_str()), ("port", port.as_str())],
        &[
            ("username", username.as_str()),
            ("password", password.as_str()),
        ],
    );

    let fdw = TdsFdw::new(TdsDriver::new());

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
