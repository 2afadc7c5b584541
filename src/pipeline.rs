//! Orchestrator-facing entry points.
//!
//! Each stage reads the previous stage's durable output, so the entry points
//! can be triggered independently and re-run at will:
//!
//! ```no_run
//! use openaq_medallion::{Pipeline, PipelineConfig, PipelineError, YearRange};
//!
//! # async fn run() -> Result<(), PipelineError> {
//! let pipeline = Pipeline::from_config(PipelineConfig::default())?;
//! pipeline.run_discovery().radius_km(5.0).call().await?;
//! let summary = pipeline
//!     .run_ingestion()
//!     .years(YearRange::new(2023, 2024))
//!     .call()
//!     .await?;
//! println!("{summary}");
//! pipeline.run_transform().call().await?;
//! pipeline.run_aggregate().call().await?;
//! let gold = pipeline.scan_gold()?.collect();
//! # Ok(())
//! # }
//! ```

use crate::api::openaq::OpenAqClient;
use crate::api::MeasurementApi;
use crate::archive::error::ArchiveError;
use crate::archive::raw_archiver::RawArchiver;
use crate::archive::{artifact_path, sensor_snapshot_path};
use crate::bronze::error::BronzeError;
use crate::bronze::BronzeArtifact;
use crate::checkpoint::error::CheckpointError;
use crate::checkpoint::file_store::FileCheckpointStore;
use crate::checkpoint::CheckpointStore;
use crate::config::error::ConfigError;
use crate::config::{PipelineConfig, StorageLayout};
use crate::discovery::{snapshot, SensorLocator};
use crate::error::PipelineError;
use crate::fetcher::error::FetchError;
use crate::fetcher::rate_limiter::RequestLimiter;
use crate::fetcher::retry::RetryPolicy;
use crate::fetcher::unit_fetcher::UnitFetcher;
use crate::gold::error::GoldError;
use crate::gold::{partition as gold_partition, GoldAggregator};
use crate::silver::partition as silver_partition;
use crate::silver::{RejectionReport, SilverTransformer};
use crate::types::fetch_unit::{FetchUnit, YearRange};
use crate::types::records::CleanedRecord;
use crate::types::sensor::{LatLon, Sensor};
use crate::types::summary::{RunSummary, Stage};
use bon::bon;
use futures_util::{stream, StreamExt, TryStreamExt};
use log::{error, info, warn};
use polars::prelude::LazyFrame;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

enum IngestOutcome {
    Cancelled,
    /// Claimed by another worker or completed meanwhile.
    AlreadyClaimed,
    Archived { records: u64 },
    FetchFailed { unit: FetchUnit, error: FetchError },
    WriteFailed { unit: FetchUnit, error: ArchiveError },
    CheckpointFailed { unit: FetchUnit, error: CheckpointError },
}

enum TransformOutcome {
    Cancelled,
    Done {
        records: u64,
        report: RejectionReport,
        parse_warnings: u64,
    },
    Failed {
        unit: FetchUnit,
        reason: String,
        permanent: bool,
    },
}

/// The air-quality pipeline over one storage layout and one measurement API.
pub struct Pipeline<A> {
    config: PipelineConfig,
    layout: StorageLayout,
    api: A,
    checkpoints: Arc<dyn CheckpointStore>,
    limiter: Arc<RequestLimiter>,
}

impl Pipeline<OpenAqClient> {
    /// A pipeline talking to the OpenAQ API configured in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the config is invalid or the API
    /// key variable is unset.
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let api = OpenAqClient::from_config(&config)?;
        Self::new(config, api)
    }
}

#[bon]
impl<A: MeasurementApi> Pipeline<A> {
    /// Validates `config`, resolves the storage layout and opens the file
    /// checkpoint store.
    pub fn new(config: PipelineConfig, api: A) -> Result<Self, PipelineError> {
        let layout = config.storage.resolve()?;
        let checkpoints = FileCheckpointStore::new(&layout.checkpoints)?;
        Self::with_checkpoints(config, api, Arc::new(checkpoints))
    }

    /// Like [`Pipeline::new`], with a caller-provided checkpoint store.
    pub fn with_checkpoints(
        config: PipelineConfig,
        api: A,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let layout = config.storage.resolve()?;
        for dir in [&layout.raw, &layout.silver, &layout.gold] {
            std::fs::create_dir_all(dir)
                .map_err(|e| PipelineError::StorageDirCreation(dir.clone(), e))?;
        }
        let limiter = Arc::new(RequestLimiter::new(
            config.max_in_flight,
            config.min_request_interval(),
        ));
        Ok(Self {
            config,
            layout,
            api,
            checkpoints,
            limiter,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// The sensor snapshot written by discovery.
    pub async fn sensors(&self) -> Result<Vec<Sensor>, PipelineError> {
        Ok(snapshot::load(&sensor_snapshot_path(&self.layout.raw)).await?)
    }

    /// Discovers sensors around `center` and merges them into the sensor
    /// snapshot. Unset arguments fall back to the config.
    ///
    /// `units_processed` counts newly added sensors, `units_skipped` the ones
    /// already known.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Discovery`] if the radius is invalid, the API keeps
    /// failing, or the snapshot cannot be written.
    #[builder]
    pub async fn run_discovery(
        &self,
        center: Option<LatLon>,
        radius_km: Option<f64>,
        parameters: Option<Vec<String>>,
    ) -> Result<RunSummary, PipelineError> {
        let center = center.unwrap_or(self.config.center);
        let radius_km = radius_km.unwrap_or(self.config.radius_km);
        let parameters = parameters.unwrap_or_else(|| self.config.parameters.clone());

        let locator = SensorLocator::new(
            &self.api,
            RetryPolicy::from_config(&self.config),
            self.config.request_timeout(),
        );
        let discovered = locator.locate(center, radius_km, &parameters).await?;
        let (merged, added) =
            snapshot::merge(&sensor_snapshot_path(&self.layout.raw), &discovered).await?;

        let mut summary = RunSummary::new(Stage::Discovery);
        summary.units_total = discovered.len();
        summary.units_processed = added;
        summary.units_skipped = discovered.len() - added;
        info!(
            "Discovery found {} sensors, {} new, snapshot holds {}",
            discovered.len(),
            added,
            merged.len()
        );
        Ok(summary)
    }

    /// Fetches and archives every pending (sensor, year) unit of the sensor
    /// snapshot. Completed units are skipped, so re-running only fetches
    /// what is missing.
    ///
    /// Units listed in `refetch` have their checkpoints invalidated first and
    /// are fetched again, overwriting their artifacts. This is how a corrupt
    /// artifact is recovered. They are fetched even outside `years`; units of
    /// sensors missing from the snapshot are ignored.
    ///
    /// # Errors
    ///
    /// * [`PipelineError::CheckpointWriteFailure`] when a unit cannot be
    ///   checkpointed. Units already in flight are finished first.
    /// * [`PipelineError::ApiUnavailable`] after
    ///   `max_consecutive_unit_failures` transient unit failures in a row.
    ///   The partial summary is attached.
    #[builder]
    pub async fn run_ingestion(
        &self,
        years: Option<YearRange>,
        refetch: Option<Vec<FetchUnit>>,
        cancel: Option<CancellationToken>,
    ) -> Result<RunSummary, PipelineError> {
        let years = years.unwrap_or(self.config.years);
        if years.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "years",
                reason: "start year is after end year".to_string(),
            }
            .into());
        }
        let cancel = cancel.unwrap_or_default();
        let sensors: HashMap<u64, Sensor> = self
            .sensors()
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        let mut units: Vec<FetchUnit> = sensors
            .keys()
            .flat_map(|id| years.years().map(move |year| FetchUnit::new(*id, year)))
            .collect();
        for unit in refetch.unwrap_or_default() {
            if !sensors.contains_key(&unit.sensor_id) {
                warn!("Cannot re-fetch {}: sensor is not in the snapshot", unit);
                continue;
            }
            self.checkpoints.invalidate(&unit)?;
            units.push(unit);
        }
        units.sort();
        units.dedup();
        let pending = self.checkpoints.list_pending(&units)?;

        let mut summary = RunSummary::new(Stage::Ingestion);
        summary.units_total = units.len();
        summary.units_skipped = units.len() - pending.len();
        info!(
            "Ingesting {} sensors over {}-{}: {} units, {} pending",
            sensors.len(),
            years.start,
            years.end,
            units.len(),
            pending.len()
        );

        let fetcher = UnitFetcher::new(
            &self.api,
            self.limiter.clone(),
            RetryPolicy::from_config(&self.config),
            self.config.page_limit,
            self.config.request_timeout(),
            self.config.unit_timeout(),
            self.config.rate_limit_floor,
        );
        let archiver = RawArchiver::new(&self.layout.raw, self.checkpoints.clone());
        let work: Vec<(FetchUnit, &Sensor)> = pending
            .into_iter()
            .filter_map(|unit| sensors.get(&unit.sensor_id).map(|s| (unit, s)))
            .collect();
        let (fetcher_ref, archiver_ref, cancel_ref) = (&fetcher, &archiver, &cancel);
        let mut outcomes = stream::iter(work)
            .map(move |(unit, sensor)| {
                self.ingest_unit(unit, sensor, fetcher_ref, archiver_ref, cancel_ref)
            })
            .buffer_unordered(self.config.workers);

        let mut consecutive_failures = 0usize;
        let mut api_down = false;
        let mut fatal: Option<PipelineError> = None;
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                IngestOutcome::Cancelled => {
                    summary.units_skipped += 1;
                    summary.cancelled = true;
                }
                IngestOutcome::AlreadyClaimed => summary.units_skipped += 1,
                IngestOutcome::Archived { records } => {
                    consecutive_failures = 0;
                    summary.units_processed += 1;
                    summary.records_written += records;
                }
                IngestOutcome::FetchFailed { unit, error } => {
                    let permanent = error.is_permanent();
                    warn!("{}", error);
                    summary.record_failure(unit, error.to_string(), permanent);
                    if !permanent {
                        consecutive_failures += 1;
                        if consecutive_failures >= self.config.max_consecutive_unit_failures
                            && !api_down
                        {
                            error!(
                                "{} consecutive units failed, giving up on this run",
                                consecutive_failures
                            );
                            api_down = true;
                            cancel.cancel();
                        }
                    }
                }
                IngestOutcome::WriteFailed { unit, error } => {
                    warn!("Archiving {} failed: {}", unit, error);
                    summary.record_failure(unit, error.to_string(), false);
                }
                IngestOutcome::CheckpointFailed { unit, error } => {
                    error!("Checkpointing {} failed: {}", unit, error);
                    summary.record_failure(unit, error.to_string(), false);
                    if fatal.is_none() {
                        fatal = Some(PipelineError::CheckpointWriteFailure {
                            unit,
                            source: error,
                        });
                        cancel.cancel();
                    }
                }
            }
        }
        (summary.requests, summary.retries) = fetcher.totals();
        info!("{}", summary);

        if let Some(err) = fatal {
            return Err(err);
        }
        if api_down {
            return Err(PipelineError::ApiUnavailable {
                consecutive_failures,
                summary: Box::new(summary),
            });
        }
        Ok(summary)
    }

    async fn ingest_unit(
        &self,
        unit: FetchUnit,
        sensor: &Sensor,
        fetcher: &UnitFetcher<'_, A>,
        archiver: &RawArchiver,
        cancel: &CancellationToken,
    ) -> IngestOutcome {
        if cancel.is_cancelled() {
            return IngestOutcome::Cancelled;
        }
        match self.checkpoints.try_begin(&unit) {
            Ok(true) => {}
            Ok(false) => return IngestOutcome::AlreadyClaimed,
            Err(error) => return IngestOutcome::CheckpointFailed { unit, error },
        }
        let outcome = match fetcher.fetch_unit(unit).await {
            Ok(fetched) => {
                let records = fetched.records;
                match archiver.archive(sensor, fetched).await {
                    Ok(_) => IngestOutcome::Archived { records },
                    Err(ArchiveError::Checkpoint(error)) => {
                        IngestOutcome::CheckpointFailed { unit, error }
                    }
                    Err(error) => IngestOutcome::WriteFailed { unit, error },
                }
            }
            Err(error) => IngestOutcome::FetchFailed { unit, error },
        };
        self.checkpoints.release(&unit);
        outcome
    }

    /// Rebuilds the silver partition of every archived unit.
    ///
    /// A corrupt artifact fails only its own unit and is reported as a
    /// permanent failure; re-fetch it to recover.
    #[builder]
    pub async fn run_transform(
        &self,
        cancel: Option<CancellationToken>,
    ) -> Result<RunSummary, PipelineError> {
        let cancel = cancel.unwrap_or_default();
        let units = self.checkpoints.list_complete()?;
        let transformer = SilverTransformer::new(self.config.canonical_units()?);

        let mut summary = RunSummary::new(Stage::Transform);
        summary.units_total = units.len();
        let mut rejections = RejectionReport::default();

        let (transformer_ref, cancel_ref) = (&transformer, &cancel);
        let mut outcomes = stream::iter(units)
            .map(move |unit| self.transform_unit(unit, transformer_ref, cancel_ref))
            .buffer_unordered(self.config.workers);
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                TransformOutcome::Cancelled => {
                    summary.units_skipped += 1;
                    summary.cancelled = true;
                }
                TransformOutcome::Done {
                    records,
                    report,
                    parse_warnings,
                } => {
                    summary.units_processed += 1;
                    summary.records_written += records;
                    summary.records_rejected += report.rejected();
                    summary.parse_warnings += parse_warnings;
                    rejections.merge(&report);
                }
                TransformOutcome::Failed {
                    unit,
                    reason,
                    permanent,
                } => {
                    warn!("Transforming {} failed: {}", unit, reason);
                    summary.record_failure(unit, reason, permanent);
                }
            }
        }
        info!("{}", summary);
        info!("Silver rejections: {}", rejections);
        Ok(summary)
    }

    async fn transform_unit(
        &self,
        unit: FetchUnit,
        transformer: &SilverTransformer,
        cancel: &CancellationToken,
    ) -> TransformOutcome {
        if cancel.is_cancelled() {
            return TransformOutcome::Cancelled;
        }
        let artifact = match BronzeArtifact::load(&artifact_path(&self.layout.raw, &unit)).await {
            Ok(artifact) => artifact,
            Err(e) => {
                return TransformOutcome::Failed {
                    unit,
                    permanent: matches!(e, BronzeError::CorruptArtifact { .. }),
                    reason: e.to_string(),
                }
            }
        };
        let (batch, parse_warnings) = {
            let mut records = artifact.records();
            let batch = transformer.transform(&unit.window(), &mut records);
            (batch, records.stats().warnings())
        };
        let records = batch.records.len() as u64;
        let path = silver_partition::partition_path(&self.layout.silver, &unit);
        match silver_partition::write_partition(&path, batch.records).await {
            Ok(()) => TransformOutcome::Done {
                records,
                report: batch.report,
                parse_warnings,
            },
            Err(e) => TransformOutcome::Failed {
                unit,
                reason: e.to_string(),
                permanent: false,
            },
        }
    }

    /// Recomputes gold from all silver partitions, one year at a time. Each
    /// year's gold partitions are replaced as a whole; a year with an
    /// unreadable silver partition keeps its previous gold output.
    #[builder]
    pub async fn run_aggregate(
        &self,
        cancel: Option<CancellationToken>,
    ) -> Result<RunSummary, PipelineError> {
        let cancel = cancel.unwrap_or_default();
        let partitions = silver_partition::list_partitions(&self.layout.silver)
            .map_err(|e| GoldError::SilverListing(self.layout.silver.clone(), e))?;
        let sensors = snapshot::load_map(&sensor_snapshot_path(&self.layout.raw)).await?;
        let aggregator = GoldAggregator::new(
            self.config.time_bucket,
            self.config.aggregate_scope,
            Duration::from_secs(self.config.expected_interval_secs),
        );

        let mut by_year: BTreeMap<i32, Vec<(FetchUnit, PathBuf)>> = BTreeMap::new();
        for (unit, path) in partitions {
            by_year.entry(unit.year).or_default().push((unit, path));
        }

        let mut summary = RunSummary::new(Stage::Aggregate);
        summary.units_total = by_year.values().map(Vec::len).sum();
        for (year, parts) in by_year {
            if cancel.is_cancelled() {
                summary.units_skipped += parts.len();
                summary.cancelled = true;
                continue;
            }
            let part_count = parts.len();
            let reads: Vec<_> = stream::iter(parts)
                .map(|(unit, path)| async move {
                    (unit, silver_partition::read_partition(&path).await)
                })
                .buffered(self.config.workers)
                .collect()
                .await;

            let mut records: Vec<CleanedRecord> = Vec::new();
            let mut unreadable = 0;
            for (unit, read) in reads {
                match read {
                    Ok(mut part) => records.append(&mut part),
                    Err(e) => {
                        warn!("Keeping previous gold for {}: {}", year, e);
                        summary.record_failure(unit, e.to_string(), false);
                        unreadable += 1;
                    }
                }
            }
            if unreadable > 0 {
                summary.units_skipped += part_count - unreadable;
                continue;
            }

            let aggregates = aggregator.aggregate(&records, &sensors);
            let written = aggregates.len() as u64;
            let gold_root = &self.layout.gold;
            let keep: Vec<PathBuf> = stream::iter(gold_partition::partition(aggregates))
                .map(|((year, group), rows)| async move {
                    let path = gold_partition::partition_path(gold_root, year, &group);
                    gold_partition::write_partition(&path, rows).await?;
                    Ok::<PathBuf, GoldError>(path)
                })
                .buffer_unordered(self.config.workers)
                .try_collect()
                .await?;
            gold_partition::remove_stale(gold_root, year, &keep).await?;
            info!(
                "Gold {}: {} aggregates in {} partitions from {} silver partitions",
                year,
                written,
                keep.len(),
                part_count
            );
            summary.units_processed += part_count;
            summary.records_written += written;
        }
        info!("{}", summary);
        Ok(summary)
    }

    /// Every gold partition as one lazy frame.
    pub fn scan_gold(&self) -> Result<LazyFrame, PipelineError> {
        Ok(gold_partition::scan(&self.layout.gold)?)
    }
}
