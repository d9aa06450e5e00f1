//! Command implementations for the reindex binary.
//!
//! Handles:
//! - full: plan and run a full reindex, inline or through the job queue
//! - group: rerun one striped group
//! - trigger: reindex (or delete) one entity and its dependents
//! - search: query an index under a variant state

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use reindex_indexing::{
    FlushOutcome, GroupTask, ImmediateReindexHandler, IndexRegistry, IndexingContext,
    LoggingProgressCallback, ProcessResult, QueuedReindexHandler, ReindexHandler,
    ReindexOrchestrator, ReindexProgress, SearchUpdater,
};
use reindex_schema::InMemoryEntityStore;
use reindex_scheduler::{
    CommitCoordinator, CooldownPolicy, InMemoryJobQueue, JobRegistry, PassReport,
};
use reindex_search::{SearchIndexConfig, TantivySearchEngine};
use reindex_types::{
    FilterValue, ReindexHandlerKind, SearchEngine, SearchQuery, SearchResults, Settings,
    VariantStateVector,
};
use reindex_variants::VariantRegistry;

use crate::cli::{Cli, Commands, HandlerArg};
use crate::fixture::Fixture;

/// Upper bound on queue passes when draining after a queued run.
pub const MAX_DRAIN_PASSES: usize = 10_000;

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    index_path_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    if let Some(index_path) = index_path_override {
        settings.search_index_path = index_path.to_string();
    }
    Ok(settings)
}

pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Everything a command needs: the fixture-backed store, one engine per
/// declared index, the commit coordinator and a job queue.
pub struct Workspace {
    pub settings: Settings,
    pub variants: Arc<VariantRegistry>,
    pub store: Arc<InMemoryEntityStore>,
    pub queue: Arc<InMemoryJobQueue>,
    pub ctx: IndexingContext,
}

impl Workspace {
    /// Open a workspace writing to tantivy indexes below
    /// `settings.search_index_path`.
    pub fn open(settings: Settings, fixture: &Fixture) -> Result<Self> {
        let root = PathBuf::from(&settings.search_index_path);
        let memory_mb = settings.writer_memory_mb;
        Self::with_engines(settings, fixture, |name| {
            let config = SearchIndexConfig::for_index(&root, name).with_memory_mb(memory_mb);
            let engine = TantivySearchEngine::open(name, config)
                .with_context(|| format!("Failed to open search index {}", name))?;
            Ok(Arc::new(engine) as Arc<dyn SearchEngine>)
        })
    }

    /// Open a workspace with engines from `make_engine`.
    pub fn with_engines(
        settings: Settings,
        fixture: &Fixture,
        make_engine: impl Fn(&str) -> Result<Arc<dyn SearchEngine>>,
    ) -> Result<Self> {
        let variants = fixture.variants()?;
        let store = Arc::new(fixture.store(&variants));

        let mut indexes = IndexRegistry::new();
        for definition in fixture.index_definitions(&variants)? {
            let engine = make_engine(definition.name())?;
            indexes.register(definition, engine);
        }

        let cooldown = CooldownPolicy::new(settings.commit.cooldown_secs)
            .with_jitter(settings.commit.cooldown_jitter_secs);
        let commits = Arc::new(CommitCoordinator::new(cooldown));
        let ctx = IndexingContext::new(
            variants.clone(),
            Arc::new(indexes),
            store.clone(),
            commits,
        );

        info!(
            types = fixture.types.len(),
            entities = store.len(),
            indexes = ctx.indexes.len(),
            "Workspace loaded"
        );

        Ok(Self {
            settings,
            variants,
            store,
            queue: Arc::new(InMemoryJobQueue::new().with_registry(Arc::new(JobRegistry::new()))),
            ctx,
        })
    }

    pub fn orchestrator(&self, batch_size: Option<u64>) -> Arc<ReindexOrchestrator> {
        Arc::new(ReindexOrchestrator::new(
            self.ctx.clone(),
            batch_size.unwrap_or(self.settings.reindex.batch_size),
        ))
    }

    /// Run queued jobs to completion; failed jobs are logged.
    pub fn drain_queue(&self) -> PassReport {
        let (report, _) = self.queue.drain(Utc::now(), MAX_DRAIN_PASSES);
        for failed in self.queue.failed_jobs() {
            warn!(
                kind = %failed.info.kind,
                signature = %failed.info.signature,
                error = %failed.error,
                "Job failed"
            );
        }
        if let Some(registry) = self.queue.registry() {
            for status in registry.get_all_status() {
                info!(
                    kind = %status.job_kind,
                    runs = status.run_count,
                    errors = status.error_count,
                    "Job kind summary"
                );
            }
        }
        if !self.queue.is_empty() {
            warn!(pending = self.queue.len(), "Queue not drained");
        }
        report
    }

    /// Every declared index, or just the requested ones.
    fn resolve_indexes(&self, requested: &[String]) -> Result<Vec<String>> {
        if requested.is_empty() {
            return Ok(self.ctx.indexes.names());
        }
        for name in requested {
            self.ctx.index(name)?;
        }
        Ok(requested.to_vec())
    }
}

/// Full reindex of `indexes` (all when empty).
pub fn run_full(
    ws: &Workspace,
    indexes: &[String],
    classes: &[String],
    handler: ReindexHandlerKind,
    batch_size: Option<u64>,
) -> Result<ReindexProgress> {
    let indexes = ws.resolve_indexes(indexes)?;
    let type_filter = (!classes.is_empty()).then_some(classes);
    let orchestrator = ws.orchestrator(batch_size);
    let callback = LoggingProgressCallback::new(10);

    info!(indexes = ?indexes, ?handler, "Starting full reindex");
    let progress = match handler {
        ReindexHandlerKind::Immediate => {
            ImmediateReindexHandler::new(orchestrator).run_full(&indexes, type_filter, &callback)?
        }
        ReindexHandlerKind::Queued => {
            let mut progress = QueuedReindexHandler::new(orchestrator, ws.queue.clone())
                .run_full(&indexes, type_filter, &callback)?;
            let report = ws.drain_queue();
            progress.groups_done = progress.groups_total.saturating_sub(report.failed as u64);
            progress.errors += report.failed as u64;
            progress.completed = ws.queue.is_empty();
            info!(
                passes = report.pass,
                completed = report.completed,
                failed = report.failed,
                "Queue drained"
            );
            progress
        }
    };
    Ok(progress)
}

/// Rerun one group, then commit.
pub fn run_group(ws: &Workspace, task: &GroupTask) -> Result<ProcessResult> {
    let entry = ws.ctx.index(&task.index)?;
    if entry.definition.covering_class(&task.class).is_none() {
        bail!("Index {} does not cover {}", task.index, task.class);
    }
    if task.group_index >= task.group_count {
        bail!(
            "Group index {} out of range for {} groups",
            task.group_index,
            task.group_count
        );
    }

    let mut result = ws.orchestrator(None).run_group(task)?;
    let report = ws.ctx.commits.commit_dirty();
    result.errors += report.failed.len();
    Ok(result)
}

/// Reindex (or delete) one entity and everything derived from it.
pub fn run_trigger(ws: &Workspace, type_name: &str, id: u64, delete: bool) -> Result<FlushOutcome> {
    if ws.ctx.catalog().type_def(type_name).is_none() {
        bail!("Unknown type {}", type_name);
    }

    let mut updater = SearchUpdater::new(ws.ctx.clone(), ws.settings.processor.clone())
        .with_queue(ws.queue.clone());
    if delete {
        updater.on_delete(type_name, id);
    } else {
        updater.trigger_reindex(type_name, id);
    }
    info!(type_name, id, pending = updater.pending(), "Flushing dirty work");

    let outcome = updater.flush()?;
    if let FlushOutcome::Queued { batches } = outcome {
        let report = ws.drain_queue();
        info!(batches, completed = report.completed, failed = report.failed, "Queue drained");
    }
    Ok(outcome)
}

/// Parse `FIELD=VALUE` pairs; an empty value matches documents lacking the field.
pub fn parse_filters(pairs: &[String]) -> Result<BTreeMap<String, Vec<FilterValue>>> {
    let mut filters: BTreeMap<String, Vec<FilterValue>> = BTreeMap::new();
    for pair in pairs {
        let Some((field, value)) = pair.split_once('=') else {
            bail!("Expected FIELD=VALUE, got {:?}", pair);
        };
        let value = if value.is_empty() {
            FilterValue::Missing
        } else {
            FilterValue::value(value)
        };
        filters.entry(field.to_string()).or_default().push(value);
    }
    Ok(filters)
}

pub fn parse_state(json: &str) -> Result<VariantStateVector> {
    serde_json::from_str(json).with_context(|| format!("Invalid state vector {:?}", json))
}

/// Query `index` under `state` (the current state when `None`).
pub fn run_search(
    ws: &Workspace,
    index: &str,
    mut query: SearchQuery,
    state: Option<&VariantStateVector>,
    offset: usize,
    limit: usize,
) -> Result<SearchResults> {
    let entry = ws.ctx.index(index)?;
    let _guard = match state {
        Some(state) => Some(ws.variants.activate_scoped(state)?),
        None => None,
    };

    let classes = if query.classes.is_empty() {
        entry.definition.class_names()
    } else {
        query.classes.clone()
    };
    ws.variants.alter_query(&mut query, &classes);

    let results = entry.engine.search(&query, offset, limit)?;
    info!(index, total = results.total_found, "Search complete");
    Ok(results)
}

fn print_progress(progress: &ReindexProgress) {
    println!(
        "Reindexed {} group(s): {} added, {} deleted, {} error(s){}",
        progress.groups_done,
        progress.documents_added,
        progress.documents_deleted,
        progress.errors,
        if progress.completed { "" } else { " (incomplete)" }
    );
}

fn print_result(result: &ProcessResult) {
    println!(
        "{} added, {} deleted, {} skipped, {} error(s)",
        result.added, result.deleted, result.skipped, result.errors
    );
}

fn open_workspace(settings: Settings, fixture_path: &Path) -> Result<Workspace> {
    let fixture = Fixture::load(fixture_path)?;
    Workspace::open(settings, &fixture)
}

/// Dispatch a parsed command line.
pub fn handle_command(cli: Cli) -> Result<()> {
    let settings = load_settings(
        cli.config.as_deref(),
        cli.log_level.as_deref(),
        cli.index_path.as_deref(),
    )?;
    init_logging(&settings.log_level)?;

    match cli.command {
        Commands::Full {
            fixture,
            index,
            class,
            handler,
            batch_size,
        } => {
            let handler = match handler {
                Some(HandlerArg::Immediate) => ReindexHandlerKind::Immediate,
                Some(HandlerArg::Queued) => ReindexHandlerKind::Queued,
                None => settings.reindex.handler,
            };
            let ws = open_workspace(settings, &fixture.fixture)?;
            let progress = run_full(&ws, &index, &class, handler, batch_size)?;
            print_progress(&progress);
            if progress.errors > 0 {
                bail!("Full reindex finished with {} error(s)", progress.errors);
            }
        }
        Commands::Group {
            fixture,
            index,
            class,
            state,
            group_count,
            group_index,
        } => {
            let task = GroupTask {
                index,
                class,
                state: parse_state(&state)?,
                group_count,
                group_index,
            };
            let ws = open_workspace(settings, &fixture.fixture)?;
            let result = run_group(&ws, &task)?;
            println!("Group {}", task.signature());
            print_result(&result);
            if result.has_errors() {
                bail!("Group finished with {} error(s)", result.errors);
            }
        }
        Commands::Trigger {
            fixture,
            type_name,
            id,
            delete,
        } => {
            let ws = open_workspace(settings, &fixture.fixture)?;
            match run_trigger(&ws, &type_name, id, delete)? {
                FlushOutcome::Empty => println!("Nothing to reindex for {} #{}", type_name, id),
                FlushOutcome::Processed(result) => print_result(&result),
                FlushOutcome::Queued { batches } => println!("Processed {} queued batch(es)", batches),
                FlushOutcome::Discarded(count) => println!("Discarded {} dirty id(s)", count),
            }
        }
        Commands::Search {
            fixture,
            index,
            terms,
            class,
            filter,
            exclude,
            state,
            offset,
            limit,
        } => {
            let mut query = SearchQuery::new();
            query.terms = terms;
            query.classes = class;
            for (field, values) in parse_filters(&filter)? {
                query.filter(field, values);
            }
            for (field, values) in parse_filters(&exclude)? {
                query.exclude(field, values);
            }
            let state = state.as_deref().map(parse_state).transpose()?;

            let ws = open_workspace(settings, &fixture.fixture)?;
            let results = run_search(&ws, &index, query, state.as_ref(), offset, limit)?;
            println!("{} result(s)", results.total_found);
            for hit in &results.hits {
                println!(
                    "  {:<40} {:<16} {:>6.3}",
                    hit.document_id, hit.class_name, hit.score
                );
            }
        }
    }

    Ok(())
}
