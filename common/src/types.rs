use serde::{Deserialize, Serialize};

/// Identifier of a row within a batch
pub type RowId = String;

/// One row of a batch submission
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Row<P> {
    pub id: RowId,
    pub payload: P,
}

impl<P> Row<P> {
    pub fn new(id: impl Into<RowId>, payload: P) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// Lifecycle of a row: `Pending -> Running -> {Success, RetryPending, Failed}`,
/// with `RetryPending -> Running` after the backoff delay.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RowState {
    Pending,
    Running,
    RetryPending,
    Success,
    Failed,
}

impl RowState {
    /// No further attempts happen once a row is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, RowState::Success | RowState::Failed)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// One try at processing one row
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RowAttempt {
    /// 1-based attempt number
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    /// Wall time of the attempt, including any wait for a permit
    pub elapsed_ms: u64,
}

/// Terminal outcome of one row
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RowResult<T> {
    pub row_id: RowId,
    pub state: RowState,
    pub attempts: u32,
    pub value: Option<T>,
    /// Detail of the last failed attempt when the row failed
    pub error: Option<String>,
    pub history: Vec<RowAttempt>,
}

impl<T> RowResult<T> {
    pub fn is_success(&self) -> bool {
        self.state == RowState::Success
    }
}

/// Aggregate of all row outcomes for one batch submission
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BatchResult<T> {
    pub batch_id: String,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Row results in submission order
    pub rows: Vec<RowResult<T>>,
}

impl<T> BatchResult<T> {
    /// Builds the aggregate and its summary counts from terminal row results.
    pub fn from_rows(batch_id: impl Into<String>, rows: Vec<RowResult<T>>) -> Self {
        let succeeded = rows.iter().filter(|r| r.is_success()).count();
        let failed = rows.iter().filter(|r| r.state == RowState::Failed).count();
        Self {
            batch_id: batch_id.into(),
            processed: rows.len(),
            succeeded,
            failed,
            rows,
        }
    }

    pub fn failed_rows(&self) -> impl Iterator<Item = &RowResult<T>> {
        self.rows.iter().filter(|r| r.state == RowState::Failed)
    }

    /// Some rows succeeded and some failed
    pub fn is_partial_failure(&self) -> bool {
        self.failed > 0 && self.succeeded > 0
    }

    /// Every row has reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.rows.iter().all(|r| r.state.is_terminal())
    }

    /// Summary without per-row values, for logs and status displays
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.batch_id.clone(),
            processed: self.processed,
            succeeded: self.succeeded,
            failed: self.failed,
            failed_row_ids: self.failed_rows().map(|r| r.row_id.clone()).collect(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BatchSummary {
    pub batch_id: String,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_row_ids: Vec<RowId>,
}

/// Read-only snapshot of the shared permit pool
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct LimiterStatus {
    pub available: usize,
    pub waiting: usize,
    pub max: usize,
}
