//! Run orchestrator
//!
//! One run goes `Opening -> Extracting -> Transforming -> (Previewing |
//! Loading) -> Closing -> Done`. Only a failure to open a connection ends a
//! run early; table and batch failures are written into the run log. Every
//! connection opened by the run is closed before it returns.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, info_span, Instrument};

use crate::config::EngineConfig;
use crate::connection::{self, Connection, ConnectOptions, ConnectorRegistry};
use crate::error::Result;
use crate::extract::{self, ExtractOutput, HttpExtractor};
use crate::load;
use crate::pipeline::{Pipeline, SourceBinding};
use crate::run_log::{LogEntry, RunLog, Stage};
use crate::transform;
use crate::working_set::WorkingSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Opening,
    Extracting,
    Transforming,
    Previewing,
    Loading,
    Closing,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Opening => "opening",
            RunPhase::Extracting => "extracting",
            RunPhase::Transforming => "transforming",
            RunPhase::Previewing => "previewing",
            RunPhase::Loading => "loading",
            RunPhase::Closing => "closing",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

fn enter(phase: RunPhase) {
    debug!(%phase, "Run phase");
}

/// What to run
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub pipeline: &'a Pipeline,
    /// Epoch milliseconds substituted into dynamic filter values
    pub watermark: Option<i64>,
    /// Extract and transform only, truncating each destination table
    pub preview: bool,
}

impl<'a> RunRequest<'a> {
    pub fn new(pipeline: &'a Pipeline, watermark: Option<i64>) -> Self {
        Self {
            pipeline,
            watermark,
            preview: false,
        }
    }

    pub fn preview(pipeline: &'a Pipeline) -> Self {
        Self {
            pipeline,
            watermark: None,
            preview: true,
        }
    }
}

/// Result of a run that got past opening its connections
#[derive(Debug)]
pub struct RunOutput {
    pub working_set: WorkingSet,
    pub log: RunLog,
}

pub struct Orchestrator {
    registry: Arc<ConnectorRegistry>,
    config: EngineConfig,
    http: HttpExtractor,
}

impl Orchestrator {
    pub fn new(registry: Arc<ConnectorRegistry>, config: EngineConfig) -> Result<Self> {
        let http = HttpExtractor::new(config.http_timeout())?;
        Ok(Self {
            registry,
            config,
            http,
        })
    }

    /// Orchestrator over every driver compiled into this build
    pub fn with_default_drivers(config: EngineConfig) -> Result<Self> {
        let registry = ConnectorRegistry::with_default_drivers(ConnectOptions::from(&config));
        Self::new(Arc::new(registry), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    /// Execute one run
    ///
    /// Returns `Err` only for fatal errors: an invalid pipeline or a
    /// connection that could not be opened.
    pub async fn run(&self, request: RunRequest<'_>) -> Result<RunOutput> {
        let span = info_span!(
            "etl_run",
            pipeline = %request.pipeline.name,
            preview = request.preview
        );
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(&self, request: RunRequest<'_>) -> Result<RunOutput> {
        let pipeline = request.pipeline;
        let mut log = RunLog::start();
        info!(run_id = %log.run_id, watermark = ?request.watermark, "Starting run");

        enter(RunPhase::Opening);
        pipeline.validate()?;

        let source = match &pipeline.source {
            SourceBinding::Database { database, .. } => Some(self.registry.open(database).await?),
            SourceBinding::Api { .. } => None,
        };

        let destination = if request.preview {
            None
        } else {
            match self.registry.open(&pipeline.destination.database).await {
                Ok(connection) => Some(connection),
                Err(e) => {
                    enter(RunPhase::Closing);
                    if let Some(source) = &source {
                        connection::close(source.as_ref()).await;
                    }
                    return Err(e);
                },
            }
        };

        let working_set = self
            .execute(request, source.as_deref(), destination.as_deref(), &mut log)
            .await;

        enter(RunPhase::Closing);
        for connection in [source, destination].into_iter().flatten() {
            connection::close(connection.as_ref()).await;
        }

        log.finish();
        enter(RunPhase::Done);
        info!(
            run_id = %log.run_id,
            errors = log.error_count(),
            elapsed_ms = log.end_time - log.start_time,
            "{}",
            log.message
        );

        Ok(RunOutput { working_set, log })
    }

    async fn execute(
        &self,
        request: RunRequest<'_>,
        source: Option<&dyn Connection>,
        destination: Option<&dyn Connection>,
        log: &mut RunLog,
    ) -> WorkingSet {
        let pipeline = request.pipeline;
        let mut working_set = WorkingSet::default();

        enter(RunPhase::Extracting);
        let extracted = match (&pipeline.source, source) {
            (SourceBinding::Database { configs, .. }, Some(connection)) => {
                extract::extract(connection, configs, request.watermark).await
            },
            (SourceBinding::Api { api, configs }, _) => {
                self.http.extract(api, configs, request.watermark).await
            },
            (SourceBinding::Database { .. }, None) => ExtractOutput::new(),
        };
        for (table, result) in extracted {
            let (rows, errors) = match result {
                Ok(rows) => (rows, Vec::new()),
                Err(e) => (Vec::new(), vec![e]),
            };
            log.push(Stage::Extract, LogEntry::new(Stage::Extract, &table, rows.len(), &errors));
            working_set.src.insert(table, rows);
        }

        enter(RunPhase::Transforming);
        let preview_limit = request.preview.then_some(self.config.preview_limit);
        let transformed = transform::transform(
            &mut working_set,
            &pipeline.destination.configs,
            preview_limit,
        );
        for (table, result) in transformed {
            let entry = match result {
                Ok(count) => LogEntry::new(Stage::Transform, table, count, &[]),
                Err(e) => LogEntry::new(Stage::Transform, table, 0, &[e]),
            };
            log.push(Stage::Transform, entry);
        }

        match destination {
            None => enter(RunPhase::Previewing),
            Some(connection) => {
                enter(RunPhase::Loading);
                let loaded = load::load(
                    connection,
                    pipeline.destination.database.role,
                    &pipeline.destination.configs,
                    &working_set.dst,
                    self.config.batch_size,
                )
                .await;
                for (table, outcome) in loaded {
                    log.push(
                        Stage::Load,
                        LogEntry::new(Stage::Load, table, outcome.rows.len(), &outcome.errors),
                    );
                }
            },
        }

        working_set
    }
}
