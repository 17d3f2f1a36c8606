use crate::BatchError;
use batchgate_common::RowId;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Simulated generation upstream for local runs and tests.
///
/// Every call sleeps for the configured latency, then either fails or returns a
/// deterministic piece of generated text.
#[derive(Clone, Debug)]
pub struct MockGenerationApi {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    latency: Duration,
    always_fail: HashSet<RowId>,
    // row id -> number of leading calls that fail
    flaky: HashMap<RowId, u32>,
    log: Mutex<CallLog>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

#[derive(Debug, Default)]
struct CallLog {
    calls: HashMap<RowId, u32>,
    starts: Vec<(RowId, Instant)>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GeneratedContent {
    pub row_id: RowId,
    pub text: String,
}

impl MockGenerationApi {
    pub fn new(latency: Duration) -> Self {
        Self::build(latency, HashSet::new(), HashMap::new())
    }

    /// Rows in `ids` fail on every call.
    pub fn with_failing_rows<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RowId>,
    {
        let mut always_fail = self.inner.always_fail.clone();
        always_fail.extend(ids.into_iter().map(Into::into));
        Self::build(self.inner.latency, always_fail, self.inner.flaky.clone())
    }

    /// Row `id` fails its first `failures` calls, then succeeds.
    pub fn with_flaky_row(self, id: impl Into<RowId>, failures: u32) -> Self {
        let mut flaky = self.inner.flaky.clone();
        flaky.insert(id.into(), failures);
        Self::build(self.inner.latency, self.inner.always_fail.clone(), flaky)
    }

    fn build(latency: Duration, always_fail: HashSet<RowId>, flaky: HashMap<RowId, u32>) -> Self {
        Self {
            inner: Arc::new(Inner {
                latency,
                always_fail,
                flaky,
                log: Mutex::new(CallLog::default()),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    pub async fn generate(&self, row_id: &str, prompt: &str) -> Result<GeneratedContent, BatchError> {
        let call_no = {
            let mut log = self.log();
            log.starts.push((row_id.to_string(), Instant::now()));
            let n = log.calls.entry(row_id.to_string()).or_insert(0);
            *n += 1;
            *n
        };

        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.inner.latency).await;
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.inner.always_fail.contains(row_id) {
            return Err(BatchError::Upstream(format!("HTTP 500 for row {row_id}")));
        }
        if let Some(&failures) = self.inner.flaky.get(row_id) {
            if call_no <= failures {
                return Err(BatchError::Upstream(format!("HTTP 429 for row {row_id} (call {call_no})")));
            }
        }

        Ok(GeneratedContent {
            row_id: row_id.to_string(),
            text: format!("generated[{row_id}]: {prompt}"),
        })
    }

    /// Number of calls made for `row_id`
    pub fn calls(&self, row_id: &str) -> u32 {
        self.log().calls.get(row_id).copied().unwrap_or(0)
    }

    /// Start instants of every call for `row_id`, oldest first
    pub fn start_times(&self, row_id: &str) -> Vec<Instant> {
        self.log()
            .starts
            .iter()
            .filter(|(id, _)| id == row_id)
            .map(|(_, at)| *at)
            .collect()
    }

    /// Highest number of calls observed running at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::SeqCst)
    }

    fn log(&self) -> MutexGuard<'_, CallLog> {
        self.inner.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
