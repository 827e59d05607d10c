//! Opening an initialized project: config, stores and the lifecycle wired
//! together for one command invocation.

use crate::output::{CliError, OutputMode, fail};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use ticketdrop_core::clock::SystemClock;
use ticketdrop_core::config::{ProjectConfig, ProjectPaths, load_project_config};
use ticketdrop_core::error::ErrorCode;
use ticketdrop_core::lifecycle::{Lifecycle, LifecycleError, Outcome};
use ticketdrop_core::lock::{DEFAULT_LOCK_TIMEOUT, StoreLock};
use ticketdrop_core::model::TicketId;
use ticketdrop_core::queue::{OfflineQueue, RetryPolicy, SqliteQueue};
use ticketdrop_core::reference::StaticReferenceData;
use ticketdrop_core::store::SqliteStore;
use ticketdrop_core::validate::{Issue, ValidationRules, Validator};

pub struct Project {
    pub paths: ProjectPaths,
    pub config: ProjectConfig,
    pub lifecycle: Arc<Lifecycle>,
}

impl Project {
    /// Open the project rooted at `project_root`, rendering any failure.
    pub fn open(project_root: &Path, output: OutputMode) -> anyhow::Result<Self> {
        match Self::try_open(project_root) {
            Ok(project) => Ok(project),
            Err(err) => fail(output, &err),
        }
    }

    fn try_open(project_root: &Path) -> Result<Self, CliError> {
        let paths = ProjectPaths::new(project_root);
        if !paths.is_initialized() {
            return Err(CliError::from(ErrorCode::NotInitialized));
        }

        let config = load_project_config(project_root)
            .map_err(|e| CliError::coded(ErrorCode::ConfigParseError, format!("{e:#}")))?;
        let tz = config
            .dispatch
            .tz()
            .map_err(|e| CliError::coded(ErrorCode::ConfigParseError, e.to_string()))?;

        let store = SqliteStore::open(paths.database())
            .map_err(|e| CliError::coded(e.code(), e.to_string()))?;
        let reference = Arc::new(StaticReferenceData::from(&config.reference));
        let validator = Validator::new(reference, ValidationRules::from(&config.validation));
        let lifecycle = Arc::new(Lifecycle::new(Arc::new(store), validator, Arc::new(SystemClock), tz));

        tracing::debug!(root = %project_root.display(), timezone = %tz, "project opened");
        Ok(Self {
            paths,
            config,
            lifecycle,
        })
    }

    /// The offline queue persisted next to the tickets.
    pub fn queue(&self, output: OutputMode) -> anyhow::Result<OfflineQueue> {
        match SqliteQueue::open(self.paths.database()) {
            Ok(storage) => Ok(OfflineQueue::new(
                Arc::new(storage),
                Arc::clone(&self.lifecycle),
                RetryPolicy::from(&self.config.queue),
            )),
            Err(err) => fail(output, &CliError::coded(err.code(), err.to_string())),
        }
    }

    /// Interval between background drain passes.
    pub const fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.config.queue.drain_interval_ms)
    }

    /// Hold the project lock for a multi-ticket write such as a batch
    /// creation or an export.
    pub fn lock(&self, output: OutputMode) -> anyhow::Result<StoreLock> {
        match StoreLock::acquire(&self.paths.lock(), DEFAULT_LOCK_TIMEOUT) {
            Ok(lock) => Ok(lock),
            Err(err) => fail(output, &CliError::coded(err.code(), err.to_string())),
        }
    }
}

/// Parse a ticket id argument, rendering a field-scoped error when malformed.
pub fn parse_id(raw: &str, output: OutputMode) -> anyhow::Result<TicketId> {
    match raw.parse::<TicketId>() {
        Ok(id) => Ok(id),
        Err(err) => {
            let mut error = CliError::coded(ErrorCode::InvalidFieldValue, err.to_string());
            error.issues.push(Issue {
                field: "ticket_id".to_string(),
                message: err.to_string(),
            });
            fail(output, &error)
        }
    }
}

/// Parse repeated id arguments such as `--ticket`.
pub fn parse_ids(raw: &[String], output: OutputMode) -> anyhow::Result<Vec<TicketId>> {
    raw.iter().map(|id| parse_id(id, output)).collect()
}

/// Unwrap a lifecycle result: infrastructure faults and rejections are both
/// rendered and fail the command; applied values come back with warnings.
pub fn settle<T>(
    result: Result<Outcome<T>, LifecycleError>,
    output: OutputMode,
) -> anyhow::Result<(T, Vec<Issue>)> {
    match result {
        Ok(Outcome::Applied { value, warnings }) => Ok((value, warnings)),
        Ok(Outcome::Rejected { rejection }) => {
            tracing::debug!(code = rejection.code().code(), "operation rejected");
            fail(output, &CliError::from(&rejection))
        }
        Err(err) => fail(output, &CliError::coded(err.code(), err.to_string())),
    }
}

/// Render an infrastructure error from a read path.
pub fn infra<T>(err: &LifecycleError, output: OutputMode) -> anyhow::Result<T> {
    fail(output, &CliError::coded(err.code(), err.to_string()))
}
