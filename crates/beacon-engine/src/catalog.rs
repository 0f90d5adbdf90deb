use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use beacon_core::{config::SchedulerConfig, fail, types::QueryResults, Failure, Fallible};

/// Why the catalog refused or failed a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("{0}")]
    Malformed(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    SourceUnavailable(String),

    #[error("{0}")]
    Federation(String),
}

/// One re-execution of a stored query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub expression: String,
    /// 1-based index of the first hit to return.
    pub start_index: u32,
    pub page_size: u32,
    pub timeout: Duration,
    /// Scheduled queries run with system privileges, not as the schedule's user.
    pub as_system: bool,
}

/// The catalog's query engine.
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Check that `expression` can be parsed, without running it.
    fn validate(&self, expression: &str) -> Result<(), QueryError> {
        if expression.trim().is_empty() {
            return Err(QueryError::Malformed("the expression is empty".into()));
        }
        Ok(())
    }

    async fn execute(&self, request: &QueryRequest) -> Result<QueryResults, QueryError>;
}

/// Runs stored queries with the configured page size and timeout.
pub struct QueryRunner {
    service: Arc<dyn QueryService>,
    page_size: u32,
    timeout: Duration,
}

impl QueryRunner {
    pub fn new(service: Arc<dyn QueryService>, config: &SchedulerConfig) -> Self {
        Self {
            service,
            page_size: config.page_size,
            timeout: Duration::from_millis(config.query_timeout_ms),
        }
    }

    pub fn request(&self, expression: &str) -> QueryRequest {
        QueryRequest {
            expression: expression.to_string(),
            start_index: 1,
            page_size: self.page_size,
            timeout: self.timeout,
            as_system: true,
        }
    }

    pub fn validate(&self, expression: &str) -> Fallible {
        self.service
            .validate(expression)
            .map_err(|e| describe(expression, e))
    }

    /// Execute `expression`, giving up once the timeout has passed.
    pub async fn run(&self, expression: &str) -> Fallible<QueryResults> {
        let request = self.request(expression);
        debug!(%expression, page_size = request.page_size, "running stored query");

        match tokio::time::timeout(self.timeout, self.service.execute(&request)).await {
            Ok(Ok(results)) => Ok(results),
            Ok(Err(e)) => Err(describe(expression, e)),
            Err(_) => fail!(
                "The query \"{expression}\" did not complete within {} ms",
                self.timeout.as_millis()
            ),
        }
    }
}

fn describe(expression: &str, error: QueryError) -> Failure {
    let message = match error {
        QueryError::Malformed(reason) => {
            format!("There was a problem reading the given query expression: {reason}")
        }
        QueryError::Unsupported(reason) => format!(
            "The query \"{expression}\" is not supported by the given catalog framework: {reason}"
        ),
        QueryError::SourceUnavailable(reason) => {
            format!("The catalog framework sources were unavailable: {reason}")
        }
        QueryError::Federation(reason) => format!(
            "There was a problem with executing a federated search for the query \"{expression}\": {reason}"
        ),
    };
    Failure::new(message)
}
