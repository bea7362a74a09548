//! Source synchronization
//!
//! Wires configuration, the API client and the reconciliation engine into one
//! run per source:
//!
//! 1. log in (when credentials are configured)
//! 2. fetch the source's existing per-source records
//! 3. reconcile the incoming records against them
//! 4. persist the failed/updated sets (when `output_dir` is configured)
//!
//! A failure in steps 1 or 2 aborts the run before any write is attempted.

use crate::api::{ApiClient, ProductQuery};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::reconcile::{plan, ReconcilePlan, ReconcileReport, Reconciler};
use crate::record::{Record, FIELD_SOURCE};
use crate::report::persist_report;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub struct SourceSync {
    client: ApiClient,
    config: SyncConfig,
    cancel: CancellationToken,
}

impl SourceSync {
    /// Validate `config` and build the API client from it
    pub fn new(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let client = ApiClient::from_config(&config)?;
        Ok(Self::with_client(client, config))
    }

    /// Use an already configured client
    pub fn with_client(client: ApiClient, config: SyncConfig) -> Self {
        Self {
            client,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop starting writes once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Synchronize `incoming` into the Unified Listing for `source`
    #[instrument(skip(self, incoming), fields(incoming = incoming.len()))]
    pub async fn run(&self, source: &str, incoming: Vec<Record>) -> Result<ReconcileReport> {
        let incoming = stamp_source(source, incoming);
        let existing = self.connect_and_fetch(source).await?;

        let reconciler = Reconciler::new(self.client.clone(), self.config.reconcile_options())?
            .with_cancellation(self.cancel.clone());
        let report = reconciler.reconcile(incoming, &existing).await?;

        if let Some(dir) = &self.config.output_dir {
            persist_report(&report, dir, source)?;
        }

        let counts = report.summary();
        if counts.failed > 0 {
            warn!(source = %source, failed = counts.failed, "Some records could not be written");
        }
        info!(
            source = %source,
            created = counts.created,
            updated = counts.updated,
            skipped = counts.skipped,
            failed = counts.failed,
            abandoned = counts.abandoned,
            "Source synchronized"
        );

        Ok(report)
    }

    /// Dry run: log in, fetch and plan, but write nothing
    #[instrument(skip(self, incoming), fields(incoming = incoming.len()))]
    pub async fn plan(&self, source: &str, incoming: Vec<Record>) -> Result<ReconcilePlan> {
        let incoming = stamp_source(source, incoming);
        let existing = self.connect_and_fetch(source).await?;
        let plan = plan(incoming, &existing, &self.config.reconcile_options());

        let counts = plan.counts();
        info!(
            source = %source,
            to_create = counts.to_create,
            to_update = counts.to_update,
            skipped = counts.skipped,
            "Dry run planned"
        );
        Ok(plan)
    }

    async fn connect_and_fetch(&self, source: &str) -> Result<Vec<Record>> {
        if let Some((username, password)) = self.config.credentials() {
            self.client.login(username, password).await?;
        }

        let query = ProductQuery::for_source(source, self.config.existing_limit);
        let existing = self.client.fetch_products(&query).await?;
        info!(source = %source, existing = existing.len(), "Fetched existing records");
        Ok(existing)
    }
}

/// Fill in `source` on records the downloader left it off
fn stamp_source(source: &str, incoming: Vec<Record>) -> Vec<Record> {
    incoming
        .into_iter()
        .map(|mut record| {
            match record.source() {
                None => {
                    record.insert(FIELD_SOURCE, Value::String(source.to_string()));
                },
                Some(other) if other != source => {
                    warn!(expected = %source, found = %other, record = %record.label(), "Record from another source");
                },
                Some(_) => {},
            }
            record
        })
        .collect()
}
