// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Planning-time row-count and cost estimation.
//!
//! The planner bridge runs the configured query once on a throwaway
//! session, confirms whether the result set is non-empty by fetching at
//! most one row, and then trusts the engine's post-execution row counter
//! for the estimate. How early that counter is populated is
//! engine-dependent; the estimate is an approximation by design. The
//! session never outlives the estimate and is closed on every outcome,
//! including errors raised mid-probe.

use std::sync::Arc;

use tracing::{debug, warn};

use tds_dblib::{
    ConnectionConfig, DblibError, Driver, FetchStatus, MessageHandler, ResultsStatus, Session,
    DEFAULT_SERVERNAME,
};

/// Startup cost charged for scans that leave the local machine, biasing
/// the planner toward local alternatives when one exists.
pub const REMOTE_STARTUP_COST: f64 = 25.0;

/// A relation-size and cost estimate for one foreign table.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Estimate {
    /// Estimated number of rows the scan will produce.
    pub rows: u64,
    /// Cost to produce the first row.
    pub startup_cost: f64,
    /// Cost to produce the whole result.
    pub total_cost: f64,
}

/// Startup cost for the configured server: free when the endpoint is
/// local, [`REMOTE_STARTUP_COST`] otherwise.
pub fn startup_cost(config: &ConnectionConfig) -> f64 {
    if config.servername() == DEFAULT_SERVERNAME || config.servername() == "localhost" {
        0.0
    } else {
        REMOTE_STARTUP_COST
    }
}

/// Runs the configured query on a throwaway session and derives the
/// planner's estimate.
pub async fn estimate_relation<D: Driver>(
    driver: &D,
    config: &ConnectionConfig,
    handler: Arc<dyn MessageHandler>,
) -> Result<Estimate, DblibError> {
    let query = config.effective_query();

    let mut session = Session::open(driver, config, handler).await?;
    let rows = count_rows(&mut session, &query).await;
    // Teardown runs regardless of how the count went.
    if let Err(err) = session.close().await {
        warn!("failed to close estimate session: {err}");
    }
    let rows = rows?;

    let startup_cost = startup_cost(config);
    Ok(Estimate {
        rows,
        startup_cost,
        total_cost: rows as f64 + startup_cost,
    })
}

async fn count_rows<C>(session: &mut Session<C>, query: &str) -> Result<u64, DblibError>
where
    C: tds_dblib::Connection,
{
    match session.submit(query).await? {
        ResultsStatus::Succeed => {
            // One probe fetch distinguishes empty from non-empty; further
            // rows are abandoned in favor of the engine's counter.
            match session.conn()?.fetch_row().await? {
                FetchStatus::Row | FetchStatus::NoMoreRows => {}
                FetchStatus::BufferFull => {
                    return Err(DblibError::Execution(
                        "buffer filled up while getting plan for query".into(),
                    ));
                }
                FetchStatus::Fail => {
                    return Err(DblibError::Execution(
                        "failed to get row while getting plan for query".into(),
                    ));
                }
                FetchStatus::Other(code) => {
                    return Err(DblibError::Execution(format!(
                        "failed to get plan for query: unknown return code {code}"
                    )));
                }
            }
            let count = session.conn()?.row_count();
            if count < 0 {
                debug!(count, "engine did not report a row count; estimating 0");
                Ok(0)
            } else {
                Ok(count as u64)
            }
        }
        ResultsStatus::NoMoreResults => {
            debug!(%query, "there appear to be no results from query");
            Ok(0)
        }
        ResultsStatus::Fail => Err(DblibError::Execution(format!(
            "failed to get results from query {query}"
        ))),
        ResultsStatus::Other(code) => Err(DblibError::Execution(format!(
            "unknown return code {code} getting results from query {query}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tds_dblib::mock::{MockDriver, MockEngine};
    use tds_dblib::{EngineMessage, LogHandler, QuerySource, TypeTag};

    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("u", "p", QuerySource::Table("t".into()))
    }

    fn handler() -> Arc<dyn MessageHandler> {
        Arc::new(LogHandler)
    }

    #[tokio::test]
    async fn trusts_the_engine_counter_over_rows_pulled() {
        let engine = MockEngine::new();
        engine.set_columns(&[("a", TypeTag::VarChar)]);
        for i in 0..3 {
            engine.push_row(vec![Some(format!("r{i}").into_bytes())]);
        }
        engine.set_row_count(128);
        let driver = MockDriver::new(Arc::clone(&engine));

        let estimate = estimate_relation(&driver, &config(), handler()).await.unwrap();
        assert_eq!(estimate.rows, 128);
        // Exactly one probe fetch; the rest of the script is untouched.
        assert_eq!(engine.scripted_fetches_remaining(), 2);
    }

    #[tokio::test]
    async fn empty_result_set_estimates_zero() {
        let engine = MockEngine::new();
        engine.set_columns(&[("a", TypeTag::VarChar)]);
        let driver = MockDriver::new(Arc::clone(&engine));

        let estimate = estimate_relation(&driver, &config(), handler()).await.unwrap();
        assert_eq!(estimate.rows, 0);
    }

    #[tokio::test]
    async fn no_result_sets_estimates_zero_without_error() {
        let engine = MockEngine::new();
        engine.set_results_status(ResultsStatus::NoMoreResults);
        let driver = MockDriver::new(Arc::clone(&engine));

        let estimate = estimate_relation(&driver, &config(), handler()).await.unwrap();
        assert_eq!(estimate.rows, 0);
        assert_eq!(engine.closes(), 1);
    }

    #[tokio::test]
    async fn unknown_results_code_is_fatal() {
        let engine = MockEngine::new();
        engine.set_results_status(ResultsStatus::Other(7));
        let driver = MockDriver::new(Arc::clone(&engine));

        let err = estimate_relation(&driver, &config(), handler()).await.unwrap_err();
        assert!(err.to_string().contains("unknown return code 7"));
        // The session was still torn down.
        assert_eq!(engine.opens(), 1);
        assert_eq!(engine.closes(), 1);
    }

    #[tokio::test]
    async fn engine_error_during_probe_still_tears_down() {
        let engine = MockEngine::new();
        engine.set_columns(&[("a", TypeTag::VarChar)]);
        engine.push_engine_error(EngineMessage::new(208, 16, "Invalid object name 't'."));
        let driver = MockDriver::new(Arc::clone(&engine));

        let err = estimate_relation(&driver, &config(), handler()).await.unwrap_err();
        assert!(matches!(err, DblibError::Engine(_)));
        assert_eq!(engine.opens(), 1);
        assert_eq!(engine.closes(), 1);
    }

    #[tokio::test]
    async fn negative_counter_estimates_zero() {
        let engine = MockEngine::new();
        engine.set_columns(&[("a", TypeTag::VarChar)]);
        engine.push_row(vec![Some(b"x".to_vec())]);
        engine.set_row_count(-1);
        let driver = MockDriver::new(Arc::clone(&engine));

        let estimate = estimate_relation(&driver, &config(), handler()).await.unwrap();
        assert_eq!(estimate.rows, 0);
    }

    #[test]
    fn startup_cost_is_zero_only_for_local_endpoints() {
        assert_eq!(startup_cost(&config()), 0.0);
        assert_eq!(startup_cost(&config().with_servername("localhost")), 0.0);
        assert_eq!(
            startup_cost(&config().with_servername("db.example.com")),
            REMOTE_STARTUP_COST
        );
        // The port does not affect the heuristic.
        assert_eq!(startup_cost(&config().with_port(1433)), 0.0);
    }

    #[tokio::test]
    async fn total_cost_adds_rows_and_startup() {
        let engine = MockEngine::new();
        engine.set_columns(&[("a", TypeTag::VarChar)]);
        engine.push_row(vec![Some(b"x".to_vec())]);
        engine.set_row_count(10);
        let driver = MockDriver::new(Arc::clone(&engine));

        let config = config().with_servername("db.example.com");
        let estimate = estimate_relation(&driver, &config, handler()).await.unwrap();
        assert_eq!(estimate.startup_cost, REMOTE_STARTUP_COST);
        assert_eq!(estimate.total_cost, 10.0 + REMOTE_STARTUP_COST);
    }
}
