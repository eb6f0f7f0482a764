//! In-memory mock driver for pool tests.
//!
//! [`MockDriver`] implements [`sqlpool::Driver`] without any network I/O.
//! Responses are scripted per exact query text, latency comes from
//! `tokio::time::sleep` (so paused-clock tests stay deterministic), and
//! every statement is recorded with the connection it ran on.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlpool_testing::{MockDriver, MockResponse};
//!
//! let driver = MockDriver::builder()
//!     .with_response("SELECT 1", MockResponse::scalar(1))
//!     .with_latency(Duration::from_millis(5))
//!     .build();
//! ```
//!
//! Queries containing `SLEEP(<seconds>)` are delayed by that many seconds
//! before their response is produced.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlpool::{ConnectionSettings, Driver, Value};
use thiserror::Error;

/// Error type for mock driver operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MockError {
    /// Scripted query failure.
    #[error("query error {number}: {message}")]
    Query {
        /// Error number.
        number: i32,
        /// Error message.
        message: String,
    },

    /// Scripted connect failure.
    #[error("could not connect to [{0}]")]
    Connect(String),
}

/// Scripted response for a query.
#[derive(Clone)]
pub enum MockResponse {
    /// Return rows.
    Rows(Vec<Vec<Value>>),

    /// Return rows affected count (for INSERT/UPDATE/DELETE).
    RowsAffected(u64),

    /// Return an error.
    Error {
        /// Error number.
        number: i32,
        /// Error message.
        message: String,
    },

    /// Wait, then produce the inner response.
    Delayed(Duration, Box<MockResponse>),

    /// Compute the response from the query and its bindings.
    Custom(Arc<dyn Fn(&str, &[Value]) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows(rows) => f.debug_tuple("Rows").field(rows).finish(),
            Self::RowsAffected(n) => f.debug_tuple("RowsAffected").field(n).finish(),
            Self::Error { number, message } => f
                .debug_struct("Error")
                .field("number", number)
                .field("message", message)
                .finish(),
            Self::Delayed(delay, inner) => {
                f.debug_tuple("Delayed").field(delay).field(inner).finish()
            }
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// Create a single-cell response.
    pub fn scalar(value: impl Into<Value>) -> Self {
        Self::Rows(vec![vec![value.into()]])
    }

    /// Create an empty result response.
    pub fn empty() -> Self {
        Self::RowsAffected(0)
    }

    /// Create a rows affected response.
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// Create an error response.
    pub fn error(number: i32, message: impl Into<String>) -> Self {
        Self::Error {
            number,
            message: message.into(),
        }
    }

    /// Delay this response.
    #[must_use]
    pub fn after(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }
}

/// Result of a mock statement.
#[derive(Debug, Clone, PartialEq)]
pub struct MockOutput {
    /// Connection the statement ran on.
    pub connection: String,
    /// Returned rows.
    pub rows: Vec<Vec<Value>>,
    /// Rows affected.
    pub rows_affected: u64,
}

/// Native handle produced by [`MockDriver`].
#[derive(Debug)]
pub struct MockHandle {
    id: u64,
    name: String,
}

impl MockHandle {
    /// Unique id of this handle across the driver's lifetime.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the connection this handle was opened for.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A statement seen by the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedQuery {
    /// Connection the statement ran on.
    pub connection: String,
    /// Handle id the statement ran on.
    pub handle: u64,
    /// SQL text.
    pub query: String,
    /// Bound parameters.
    pub bindings: Vec<Value>,
}

#[derive(Default)]
struct MockDriverConfig {
    responses: HashMap<String, MockResponse>,
    default_response: Option<MockResponse>,
    latency: Option<Duration>,
    failing_connects: HashSet<String>,
}

/// Builder for [`MockDriver`].
#[derive(Default)]
pub struct MockDriverBuilder {
    config: MockDriverConfig,
}

impl MockDriverBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a response for an exact query.
    #[must_use]
    pub fn with_response(mut self, query: impl Into<String>, response: MockResponse) -> Self {
        self.config.responses.insert(query.into(), response);
        self
    }

    /// Set the response for queries without a scripted one.
    #[must_use]
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = Some(response);
        self
    }

    /// Delay every statement by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.config.latency = Some(latency);
        self
    }

    /// Make connecting the named connection fail.
    #[must_use]
    pub fn with_failing_connect(mut self, name: impl Into<String>) -> Self {
        self.config.failing_connects.insert(name.into());
        self
    }

    /// Build the driver.
    pub fn build(self) -> MockDriver {
        MockDriver {
            config: self.config,
            next_handle: AtomicU64::new(1),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        }
    }
}

/// Scripted [`Driver`] for tests.
pub struct MockDriver {
    config: MockDriverConfig,
    next_handle: AtomicU64,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    recorded: Mutex<Vec<RecordedQuery>>,
}

impl Default for MockDriver {
    fn default() -> Self {
        MockDriverBuilder::new().build()
    }
}

impl fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockDriver")
            .field("responses", &self.config.responses.len())
            .field("connects", &self.connects())
            .field("disconnects", &self.disconnects())
            .finish_non_exhaustive()
    }
}

impl MockDriver {
    /// Create a builder for a mock driver.
    pub fn builder() -> MockDriverBuilder {
        MockDriverBuilder::new()
    }

    /// Number of successful connects.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of disconnects.
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Highest number of statements that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Every statement executed so far, in start order.
    pub fn recorded(&self) -> Vec<RecordedQuery> {
        self.recorded.lock().clone()
    }

    /// Statements executed on the named connection.
    pub fn queries_on(&self, connection: &str) -> Vec<String> {
        self.recorded
            .lock()
            .iter()
            .filter(|r| r.connection == connection)
            .map(|r| r.query.clone())
            .collect()
    }

    fn response_for(&self, query: &str) -> MockResponse {
        let scripted = self
            .config
            .responses
            .get(query)
            .or(self.config.default_response.as_ref())
            .cloned()
            .unwrap_or_else(MockResponse::empty);

        match sleep_duration(query) {
            Some(delay) => scripted.after(delay),
            None => scripted,
        }
    }

    async fn resolve(
        &self,
        connection: &str,
        mut response: MockResponse,
        query: &str,
        bindings: &[Value],
    ) -> Result<MockOutput, MockError> {
        loop {
            response = match response {
                MockResponse::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    *inner
                }
                MockResponse::Custom(f) => f(query, bindings),
                MockResponse::Rows(rows) => {
                    return Ok(MockOutput {
                        connection: connection.to_owned(),
                        rows_affected: 0,
                        rows,
                    });
                }
                MockResponse::RowsAffected(count) => {
                    return Ok(MockOutput {
                        connection: connection.to_owned(),
                        rows: Vec::new(),
                        rows_affected: count,
                    });
                }
                MockResponse::Error { number, message } => {
                    return Err(MockError::Query { number, message });
                }
            };
        }
    }
}

/// Decrements the in-flight counter when a statement ends or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Handle = MockHandle;
    type Output = MockOutput;
    type Error = MockError;

    async fn connect(
        &self,
        name: &str,
        settings: &ConnectionSettings,
    ) -> Result<MockHandle, MockError> {
        if self.config.failing_connects.contains(name) {
            tracing::debug!(connection = %name, "mock connect failure");
            return Err(MockError::Connect(name.to_owned()));
        }

        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.connects.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(connection = %name, host = %settings.host, id, "mock connect");

        Ok(MockHandle {
            id,
            name: name.to_owned(),
        })
    }

    async fn disconnect(&self, handle: MockHandle) -> Result<(), MockError> {
        tracing::trace!(connection = %handle.name, id = handle.id, "mock disconnect");
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(
        &self,
        handle: &mut MockHandle,
        query: &str,
        bindings: &[Value],
    ) -> Result<MockOutput, MockError> {
        self.recorded.lock().push(RecordedQuery {
            connection: handle.name.clone(),
            handle: handle.id,
            query: query.to_owned(),
            bindings: bindings.to_vec(),
        });

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if let Some(latency) = self.config.latency {
            tokio::time::sleep(latency).await;
        }

        let response = self.response_for(query);
        self.resolve(&handle.name, response, query, bindings).await
    }

    fn resolve_name(&self, handle: &MockHandle) -> Option<String> {
        Some(handle.name.clone())
    }
}

/// Parse the argument of a `SLEEP(<seconds>)` call in a query.
///
/// Negative, non-finite and out-of-range arguments are ignored.
fn sleep_duration(query: &str) -> Option<Duration> {
    let upper = query.to_ascii_uppercase();
    let start = upper.find("SLEEP(")? + "SLEEP(".len();
    let len = upper[start..].find(')')?;
    let secs = upper[start..start + len].trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}
