// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! End-to-end scans through the full callback surface over the mock
//! engine.

use std::sync::{Arc, Mutex};

use tds_dblib::mock::{MockDriver, MockEngine};
use tds_dblib::{CellValue, DblibError, EngineMessage, MessageHandler, TypeTag};
use tds_fdw::{MemoryCatalog, ScanPhase, TableId, TdsFdw};

/// Collects everything the engine reports, keeping notices and errors
/// apart.
#[derive(Default)]
struct CollectingHandler {
    notices: Mutex<Vec<EngineMessage>>,
    errors: Mutex<Vec<EngineMessage>>,
}

impl MessageHandler for CollectingHandler {
    fn notice(&self, message: &EngineMessage) {
        self.notices.lock().unwrap().push(message.clone());
    }

    fn error(&self, message: &EngineMessage) {
        self.errors.lock().unwrap().push(message.clone());
    }
}

fn employees_catalog() -> (MemoryCatalog, TableId) {
    let mut catalog = MemoryCatalog::new();
    let table = TableId(1);
    catalog.register(
        table,
        &[("table", "employees")],
        &[],
        &[("username", "u"), ("password", "p")],
    );
    (catalog, table)
}

fn employees_engine() -> Arc<MockEngine> {
    let engine = MockEngine::new();
    engine.set_columns(&[("id", TypeTag::Other(56)), ("name", TypeTag::VarChar)]);
    engine.push_row(vec![Some(b"1".to_vec()), Some(b"ann".to_vec())]);
    engine.push_row(vec![Some(b"2".to_vec()), Some(b"bob".to_vec())]);
    engine.push_row(vec![Some(b"3".to_vec()), None]);
    engine
}

fn text(value: &str) -> Option<CellValue> {
    Some(CellValue::Text(value.into()))
}

#[tokio::test]
async fn end_to_end_employees_scan() -> Result<(), anyhow::Error> {
    let engine = employees_engine();
    engine.set_row_count(3);
    let (catalog, table) = employees_catalog();
    let fdw = TdsFdw::new(MockDriver::new(Arc::clone(&engine)));

    // Planning: size, then costs. The server is unset, hence local, hence
    // free to start.
    let rows = fdw.relation_size(&catalog, table).await?;
    assert_eq!(rows, 3);
    let costs = fdw.paths(&catalog, table, rows)?;
    assert_eq!(costs.startup_cost, 0.0);
    assert_eq!(costs.total_cost, 3.0);

    // Execution: a fresh session walks all three rows in order.
    let mut scan = fdw.begin_scan(&catalog, table).await?;
    assert!(scan.explain().is_none());

    let mut rows = Vec::new();
    while let Some(row) = scan.next_row().await? {
        rows.push(row);
    }
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].values(), &[text("1"), text("ann")]);
    assert_eq!(rows[1].values(), &[text("2"), text("bob")]);
    assert_eq!(rows[2].values(), &[text("3"), None]);
    assert_eq!(scan.phase(), ScanPhase::Exhausted);
    scan.end().await?;

    // Both the estimate's query and the scan's query were the synthesized
    // SELECT *.
    assert_eq!(
        engine.executed(),
        vec!["SELECT * FROM employees", "SELECT * FROM employees"]
    );
    // Two sessions were opened (planning and execution) and both were
    // released.
    assert_eq!(engine.opens(), 2);
    assert_eq!(engine.closes(), 2);
    Ok(())
}

#[tokio::test]
async fn notices_are_forwarded_without_interrupting_the_scan() -> Result<(), anyhow::Error> {
    let engine = employees_engine();
    engine.add_notice(EngineMessage::new(5701, 10, "Changed database context."));
    let (catalog, table) = employees_catalog();

    let handler = Arc::new(CollectingHandler::default());
    let fdw = TdsFdw::with_handler(
        MockDriver::new(Arc::clone(&engine)),
        Arc::clone(&handler) as Arc<dyn MessageHandler>,
    );

    let mut scan = fdw.begin_scan(&catalog, table).await?;
    let mut count = 0;
    while scan.next_row().await?.is_some() {
        count += 1;
    }
    scan.end().await?;

    assert_eq!(count, 3);
    let notices = handler.notices.lock().unwrap();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message, "Changed database context.");
    assert!(handler.errors.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn engine_error_cancels_the_scan_and_still_tears_down() {
    let engine = employees_engine();
    engine.push_engine_error(EngineMessage::new(1205, 13, "Transaction was deadlocked."));
    let (catalog, table) = employees_catalog();

    let handler = Arc::new(CollectingHandler::default());
    let fdw = TdsFdw::with_handler(
        MockDriver::new(Arc::clone(&engine)),
        Arc::clone(&handler) as Arc<dyn MessageHandler>,
    );

    let mut scan = fdw.begin_scan(&catalog, table).await.unwrap();
    let mut rows = 0;
    let err = loop {
        match scan.next_row().await {
            Ok(Some(_)) => rows += 1,
            Ok(None) => panic!("scan ended without surfacing the engine error"),
            Err(err) => break err,
        }
    };
    assert_eq!(rows, 3);
    assert!(matches!(err, DblibError::Engine(_)));
    assert_eq!(handler.errors.lock().unwrap().len(), 1);

    scan.end().await.unwrap();
    assert_eq!(engine.opens(), 1);
    assert_eq!(engine.closes(), 1);
}

#[tokio::test]
async fn remote_servers_pay_the_startup_penalty() -> Result<(), anyhow::Error> {
    let engine = employees_engine();
    engine.set_row_count(3);
    let mut catalog = MemoryCatalog::new();
    let table = TableId(2);
    catalog.register(
        table,
        &[("table", "employees")],
        &[("servername", "db.example.com"), ("port", "1433")],
        &[("username", "u"), ("password", "p")],
    );
    let fdw = TdsFdw::new(MockDriver::new(Arc::clone(&engine)));

    let rows = fdw.relation_size(&catalog, table).await?;
    let costs = fdw.paths(&catalog, table, rows)?;
    assert_eq!(costs.startup_cost, 25.0);
    assert_eq!(costs.total_cost, 28.0);
    Ok(())
}

#[tokio::test]
async fn configuration_errors_stop_before_any_connection() {
    let engine = MockEngine::new();
    let mut catalog = MemoryCatalog::new();
    let table = TableId(3);
    catalog.register(
        table,
        &[("table", "t"), ("query", "SELECT 1")],
        &[],
        &[("username", "u"), ("password", "p")],
    );
    let fdw = TdsFdw::new(MockDriver::new(Arc::clone(&engine)));

    let err = fdw.relation_size(&catalog, table).await.unwrap_err();
    assert!(matches!(err, DblibError::Configuration(_)));
    assert_eq!(engine.opens(), 0);

    let err = fdw.begin_scan(&catalog, table).await.unwrap_err();
    assert!(matches!(err, DblibError::Configuration(_)));
    assert_eq!(engine.opens(), 0);
}

#[tokio::test]
async fn database_option_is_selected_at_scan_setup() -> Result<(), anyhow::Error> {
    let engine = employees_engine();
    let mut catalog = MemoryCatalog::new();
    let table = TableId(4);
    catalog.register(
        table,
        &[("table", "employees"), ("database", "hr")],
        &[],
        &[("username", "u"), ("password", "p")],
    );
    let fdw = TdsFdw::new(MockDriver::new(Arc::clone(&engine)));

    let scan = fdw.begin_scan(&catalog, table).await?;
    scan.end().await?;
    assert_eq!(engine.databases_selected(), vec!["hr"]);
    Ok(())
}
