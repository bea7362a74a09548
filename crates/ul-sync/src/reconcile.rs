//! Reconciliation engine
//!
//! Diffs a source's incoming records against what the Unified Listing
//! already holds for that source and decides, per record, whether to create,
//! update or skip it. The resulting writes go through the bounded
//! [`TaskQueue`](crate::queue::TaskQueue).
//!
//! # Matching and merging
//!
//! Records are matched on `(source, sid)`. For a match, server-managed fields
//! (`status`, `uid`) the feed does not know about are carried forward from
//! the stored record, then the two are compared on the configured field set
//! only. Fields outside that set never cause an update.
//!
//! A record without `status` is written as `new`, whether or not it matched.
//!
//! # Failures
//!
//! A failed write is recorded in the report with its record and error; it
//! does not stop the other writes.
//!
//! Cancelling the reconciler's token stops new writes from starting. Writes
//! already in flight finish and are reported as usual; the rest are reported
//! as abandoned.

use crate::api::WriteKind;
use crate::error::{FieldError, Result, SyncError};
use crate::normalize::filtered_maps_equal;
use crate::queue::TaskQueue;
use crate::record::{Record, RecordKey, RecordStatus, FIELD_STATUS, FIELD_UID};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// Defaults
// ============================================================================

/// Fields compared to decide whether a matched record changed
pub const DEFAULT_COMPARE_FIELDS: &[&str] = &[
    "manufacturer",
    "description",
    "name",
    "uid",
    "sid",
    "source",
    "sourceUrl",
    "language",
];

/// Fields that change on every write and are never compared
pub const DEFAULT_VOLATILE_FIELDS: &[&str] = &["updated"];

/// Server-managed fields carried forward from the stored record
pub const PRESERVED_FIELDS: &[&str] = &[FIELD_STATUS, FIELD_UID];

/// Default ceiling on simultaneous writes
pub const DEFAULT_WRITE_CONCURRENCY: usize = 50;

// ============================================================================
// Write collaborator
// ============================================================================

/// Persists single records in the central store
#[async_trait]
pub trait RecordWriter: Send + Sync {
    /// Store a record that has no counterpart yet
    async fn create(&self, record: &Record) -> Result<Record>;

    /// Replace the stored counterpart of `record`
    async fn update(&self, record: &Record) -> Result<Record>;
}

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    pub compare_fields: Vec<String>,
    pub volatile_fields: Vec<String>,
    pub concurrency: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            compare_fields: DEFAULT_COMPARE_FIELDS.iter().map(ToString::to_string).collect(),
            volatile_fields: DEFAULT_VOLATILE_FIELDS.iter().map(ToString::to_string).collect(),
            concurrency: DEFAULT_WRITE_CONCURRENCY,
        }
    }
}

impl ReconcileOptions {
    /// Compared fields with the volatile ones removed
    pub fn comparison_fields(&self) -> Vec<&str> {
        self.compare_fields
            .iter()
            .map(String::as_str)
            .filter(|field| !self.volatile_fields.iter().any(|v| v == field))
            .collect()
    }
}

// ============================================================================
// Plan
// ============================================================================

/// A write decided by planning
#[derive(Debug, Clone, PartialEq)]
pub enum WriteTask {
    Create { record: Record },
    Update { record: Record, original: Record },
}

impl WriteTask {
    pub fn kind(&self) -> WriteKind {
        match self {
            WriteTask::Create { .. } => WriteKind::Create,
            WriteTask::Update { .. } => WriteKind::Update,
        }
    }

    pub fn record(&self) -> &Record {
        match self {
            WriteTask::Create { record } | WriteTask::Update { record, .. } => record,
        }
    }

    pub fn into_record(self) -> Record {
        match self {
            WriteTask::Create { record } | WriteTask::Update { record, .. } => record,
        }
    }
}

/// Create/update/skip decisions for one source, before any write
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    pub examined: usize,
    pub existing: usize,
    pub writes: Vec<WriteTask>,
    pub skipped: Vec<Record>,
}

/// Counts of a plan, for dry runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCounts {
    pub examined: usize,
    pub existing: usize,
    pub to_create: usize,
    pub to_update: usize,
    pub skipped: usize,
}

impl ReconcilePlan {
    pub fn creates(&self) -> usize {
        self.writes
            .iter()
            .filter(|w| w.kind() == WriteKind::Create)
            .count()
    }

    pub fn updates(&self) -> usize {
        self.writes.len() - self.creates()
    }

    pub fn counts(&self) -> PlanCounts {
        PlanCounts {
            examined: self.examined,
            existing: self.existing,
            to_create: self.creates(),
            to_update: self.updates(),
            skipped: self.skipped.len(),
        }
    }
}

fn index_existing(existing: &[Record]) -> HashMap<RecordKey, &Record> {
    let mut index = HashMap::with_capacity(existing.len());

    for record in existing {
        let Some(key) = record.key() else {
            debug!(record = %record.label(), "Existing record has no (source, sid), not indexed");
            continue;
        };
        if index.contains_key(&key) {
            warn!(key = %key, "Duplicate existing record, keeping the first");
            continue;
        }
        index.insert(key, record);
    }

    index
}

/// Copy server-managed fields the incoming record leaves falsy
fn preserve_fields(record: &mut Record, original: &Record) {
    for field in PRESERVED_FIELDS {
        if record.is_falsy(field) && !original.is_falsy(field) {
            if let Some(value) = original.get(field) {
                record.insert(*field, value.clone());
            }
        }
    }
}

fn default_status(record: &mut Record) {
    if record.is_falsy(FIELD_STATUS) {
        record.set_status(RecordStatus::New);
    }
}

/// Decide create/update/skip for every incoming record
///
/// Pure; nothing is written. Incoming records without `(source, sid)` cannot
/// match anything and are planned as creates.
pub fn plan(incoming: Vec<Record>, existing: &[Record], options: &ReconcileOptions) -> ReconcilePlan {
    let index = index_existing(existing);
    let fields = options.comparison_fields();
    let mut plan = ReconcilePlan {
        examined: incoming.len(),
        existing: existing.len(),
        ..ReconcilePlan::default()
    };

    for mut record in incoming {
        let matched = record.key().and_then(|key| index.get(&key).copied());

        match matched {
            Some(original) => {
                preserve_fields(&mut record, original);
                if filtered_maps_equal(record.fields(), original.fields(), &fields, false) {
                    plan.skipped.push(record);
                    continue;
                }
                default_status(&mut record);
                plan.writes.push(WriteTask::Update {
                    record,
                    original: original.clone(),
                });
            },
            None => {
                default_status(&mut record);
                plan.writes.push(WriteTask::Create { record });
            },
        }
    }

    debug!(
        examined = plan.examined,
        existing = plan.existing,
        creates = plan.creates(),
        updates = plan.updates(),
        skipped = plan.skipped.len(),
        "Reconciliation planned"
    );
    plan
}

// ============================================================================
// Outcomes and report
// ============================================================================

/// Stored record before and after an update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatedRecord {
    pub original: Record,
    pub updated: Record,
}

/// A write that did not go through, kept for retry and inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRecord {
    pub record: Record,
    pub operation: WriteKind,
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_errors: Vec<FieldError>,
}

/// What happened to one incoming record
#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationOutcome {
    Created(Record),
    Updated(UpdatedRecord),
    Skipped(Record),
    Failed(FailedRecord),
    /// Never attempted because the run was cancelled
    Abandoned(Record),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileCounts {
    pub examined: usize,
    pub existing: usize,
    pub new: usize,
    pub skipped: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    #[serde(default)]
    pub abandoned: usize,
}

/// Result of a reconciliation run
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub examined: usize,
    pub existing: usize,
    /// Records planned as creates
    pub new: usize,
    pub skipped: Vec<Record>,
    pub created: Vec<Record>,
    pub updated: Vec<UpdatedRecord>,
    pub failed: Vec<FailedRecord>,
    pub abandoned: Vec<Record>,
}

impl ReconcileReport {
    pub fn summary(&self) -> ReconcileCounts {
        ReconcileCounts {
            examined: self.examined,
            existing: self.existing,
            new: self.new,
            skipped: self.skipped.len(),
            created: self.created.len(),
            updated: self.updated.len(),
            failed: self.failed.len(),
            abandoned: self.abandoned.len(),
        }
    }

    pub fn into_outcomes(self) -> Vec<ReconciliationOutcome> {
        self.created
            .into_iter()
            .map(ReconciliationOutcome::Created)
            .chain(self.updated.into_iter().map(ReconciliationOutcome::Updated))
            .chain(self.skipped.into_iter().map(ReconciliationOutcome::Skipped))
            .chain(self.failed.into_iter().map(ReconciliationOutcome::Failed))
            .chain(self.abandoned.into_iter().map(ReconciliationOutcome::Abandoned))
            .collect()
    }

    fn record(&mut self, outcome: ReconciliationOutcome) {
        match outcome {
            ReconciliationOutcome::Created(record) => self.created.push(record),
            ReconciliationOutcome::Updated(pair) => self.updated.push(pair),
            ReconciliationOutcome::Skipped(record) => self.skipped.push(record),
            ReconciliationOutcome::Failed(failed) => self.failed.push(failed),
            ReconciliationOutcome::Abandoned(record) => self.abandoned.push(record),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Runs planned writes through a bounded queue
pub struct Reconciler<W> {
    writer: W,
    options: ReconcileOptions,
    cancel: CancellationToken,
}

impl<W: RecordWriter> Reconciler<W> {
    pub fn new(writer: W, options: ReconcileOptions) -> Result<Self> {
        if options.concurrency == 0 {
            return Err(SyncError::caller_contract("write concurrency must be at least 1"));
        }

        Ok(Self {
            writer,
            options,
            cancel: CancellationToken::new(),
        })
    }

    /// Stop starting writes once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Plan against `existing`, then execute the plan
    pub async fn reconcile(&self, incoming: Vec<Record>, existing: &[Record]) -> Result<ReconcileReport> {
        let plan = plan(incoming, existing, &self.options);
        self.execute(plan).await
    }

    /// Issue every write of `plan`, at most `concurrency` at a time
    ///
    /// Write errors end up in [`ReconcileReport::failed`], and writes not yet
    /// started when the token is cancelled in [`ReconcileReport::abandoned`].
    pub async fn execute(&self, plan: ReconcilePlan) -> Result<ReconcileReport> {
        let mut report = ReconcileReport {
            examined: plan.examined,
            existing: plan.existing,
            new: plan.creates(),
            skipped: plan.skipped,
            ..ReconcileReport::default()
        };

        let queue = TaskQueue::new(self.options.concurrency)?;
        let writer = &self.writer;
        let cancel = &self.cancel;
        let tasks = plan.writes.into_iter().map(|task| {
            move || async move {
                if cancel.is_cancelled() {
                    return Ok::<_, Infallible>(ReconciliationOutcome::Abandoned(task.into_record()));
                }
                Ok(apply_write(writer, task).await)
            }
        });

        for outcome in queue.run(tasks).await? {
            report.record(outcome);
        }

        let counts = report.summary();
        info!(
            examined = counts.examined,
            existing = counts.existing,
            new = counts.new,
            skipped = counts.skipped,
            created = counts.created,
            updated = counts.updated,
            failed = counts.failed,
            abandoned = counts.abandoned,
            "Reconciliation complete"
        );
        if counts.abandoned > 0 {
            warn!(abandoned = counts.abandoned, "Run cancelled before all writes started");
        }

        Ok(report)
    }
}

async fn apply_write<W: RecordWriter + ?Sized>(writer: &W, task: WriteTask) -> ReconciliationOutcome {
    let kind = task.kind();
    let result = match &task {
        WriteTask::Create { record } => writer.create(record).await,
        WriteTask::Update { record, .. } => writer.update(record).await,
    };

    match (result, task) {
        (Ok(stored), WriteTask::Create { .. }) => {
            debug!(record = %stored.label(), "Created");
            ReconciliationOutcome::Created(stored)
        },
        (Ok(stored), WriteTask::Update { original, .. }) => {
            debug!(record = %stored.label(), "Updated");
            ReconciliationOutcome::Updated(UpdatedRecord {
                original,
                updated: stored,
            })
        },
        (Err(err), task) => {
            let record = task.into_record();
            warn!(record = %record.label(), operation = %kind, error = %err, "Write failed");

            let field_errors = match err {
                SyncError::Validation { ref errors, .. } => {
                    for field in errors {
                        warn!(
                            record = %record.label(),
                            path = %field.data_path,
                            message = %field.message,
                            "Field rejected"
                        );
                    }
                    errors.clone()
                },
                _ => Vec::new(),
            };

            ReconciliationOutcome::Failed(FailedRecord {
                record,
                operation: kind,
                error: err.to_string(),
                field_errors,
            })
        },
    }
}

/// Plan and execute in one call
pub async fn reconcile<W: RecordWriter>(
    incoming: Vec<Record>,
    existing: &[Record],
    writer: W,
    options: ReconcileOptions,
) -> Result<ReconcileReport> {
    Reconciler::new(writer, options)?.reconcile(incoming, existing).await
}
