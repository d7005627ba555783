//! Checkpointed walk over a lazily-loaded, paginated list.
//!
//! Per page the engine runs
//! `AdvanceCursor → ExtractIdentity → {SkipDuplicate | Select → AwaitDetailSync
//! → LocateAction → Invoke → Record} → AdvanceCursor` until the cursor runs
//! past the rendered rows and a lazy-load nudge yields no growth. Every
//! failure is classified (see [`ErrorClass`]) and handled with a bounded
//! retry or recovery; only fatal errors leave [`ListProcessingEngine::run`].

mod invoke;
mod recovery;
mod select;

pub use invoke::{ActionInvoker, DownloadInvoker, NO_ACTION_CONTROL};

use crate::core::config::{EngineSettings, JobConfig};
use crate::core::error::{AutomationError, ErrorClass};
use crate::core::types::{
    Checkpoint, CheckpointPatch, Cursor, FailureRecord, ItemOutcome, RunReport, StepOutcome,
};
use crate::features::checkpoint_store::CheckpointStore;
use crate::features::control::RunControl;
use crate::features::events::{EngineEvent, EventSink, Severity, TracingSink};
use crate::features::humanize::{HumanizedInputSynthesizer, SharedInput};
use crate::scraping::dom::{BrowsingContext, ElementHandle};
use crate::scraping::locator::{ElementLocator, Role};
use crate::tools::navigator::PageNavigator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const REST_SLICE: Duration = Duration::from_millis(250);

/// Why a page loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageEnd {
    Complete,
    LimitReached,
}

pub struct ListProcessingEngine {
    ctx: Arc<dyn BrowsingContext>,
    locator: Arc<ElementLocator>,
    navigator: PageNavigator,
    input: SharedInput,
    store: CheckpointStore,
    invoker: Arc<dyn ActionInvoker>,
    events: Arc<dyn EventSink>,
    control: RunControl,
    settings: EngineSettings,
    job: JobConfig,
    checkpoint: Checkpoint,
    report: RunReport,
    cursor: Cursor,
    rendered: usize,
    unsaved_successes: u64,
    run_successes: u64,
    pause_saved: bool,
}

impl ListProcessingEngine {
    /// `checkpoint` is the hydrated job state (fresh or resumed).
    pub fn new(
        locator: Arc<ElementLocator>,
        store: CheckpointStore,
        job: JobConfig,
        settings: EngineSettings,
        checkpoint: Checkpoint,
    ) -> Self {
        let ctx = Arc::clone(locator.context());
        let input = HumanizedInputSynthesizer::new(settings.pacing.clone()).shared();
        let navigator = PageNavigator::new(Arc::clone(&locator), Arc::clone(&input), &settings);
        let cursor = Cursor::at_page(checkpoint.current_page.max(1));
        Self {
            ctx,
            locator,
            navigator,
            input,
            store,
            invoker: Arc::new(DownloadInvoker),
            events: Arc::new(TracingSink),
            control: RunControl::new(),
            settings,
            job,
            checkpoint,
            report: RunReport::default(),
            cursor,
            rendered: 0,
            unsaved_successes: 0,
            run_successes: 0,
            pause_saved: false,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn ActionInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    /// Replace the input synthesizer (e.g. a seeded one).
    pub fn with_input(mut self, input: SharedInput) -> Self {
        self.navigator.set_input(Arc::clone(&input));
        self.input = input;
        self
    }

    pub fn navigator(&self) -> &PageNavigator {
        &self.navigator
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    /// Process the current page and every following one until the list is
    /// exhausted, the item limit is reached or the run is stopped.
    ///
    /// Stop is not an error: the report comes back with `stopped` set. Any
    /// other `Err` is fatal; the checkpoint has been saved before it returns.
    pub async fn run(&mut self) -> Result<RunReport, AutomationError> {
        tokio::fs::create_dir_all(&self.job.output_dir).await?;
        let result = self.run_pages().await;
        match result {
            Ok(()) => {}
            Err(AutomationError::Stopped) => {
                info!("engine: stop observed, ending run");
                self.report.stopped = true;
            }
            Err(e) => {
                warn!("engine: fatal: {}", e);
                if let Err(save_err) = self.save().await {
                    warn!("engine: checkpoint save after fatal error failed: {}", save_err);
                }
                self.emit(EngineEvent::log(Severity::Error, e.to_string()));
                return Err(e);
            }
        }
        self.save().await?;
        self.emit(EngineEvent::Stats {
            success: self.checkpoint.success_count,
            failed: self.checkpoint.failed_items.len() as u64,
        });
        Ok(self.report.clone())
    }

    async fn run_pages(&mut self) -> Result<(), AutomationError> {
        loop {
            let page = self.navigator.get_active_page().await;
            self.cursor = Cursor::at_page(page);
            self.checkpoint.current_page = page;
            self.report.pages_visited += 1;
            self.report.last_page = page;
            self.save().await?;
            self.emit(EngineEvent::log(
                Severity::Info,
                format!("Processing page {}", page),
            ));

            match self.run_page().await? {
                PageEnd::LimitReached => {
                    self.report.limit_reached = true;
                    self.emit(EngineEvent::log(
                        Severity::Success,
                        format!(
                            "Reached the limit of {} {}",
                            self.checkpoint.success_count, self.job.item_label
                        ),
                    ));
                    return Ok(());
                }
                PageEnd::Complete => {
                    info!("engine: page {} complete", page);
                    if !self.navigator.has_next().await {
                        info!("engine: no further pages");
                        return Ok(());
                    }
                    if !self.navigator.advance().await {
                        warn!("engine: could not advance past page {}", page);
                        self.emit(EngineEvent::log(
                            Severity::Warning,
                            format!("Could not advance past page {}", page),
                        ));
                        return Ok(());
                    }
                    if self
                        .locator
                        .wait_for(Role::ListContainer, self.settings.list_attach_timeout())
                        .await
                        .is_none()
                    {
                        return Err(AutomationError::RecoveryFailed(
                            "list did not attach after page change".to_string(),
                        ));
                    }
                }
            }
        }
    }

    async fn run_page(&mut self) -> Result<PageEnd, AutomationError> {
        loop {
            self.suspend().await?;
            if self.limit_reached() {
                return Ok(PageEnd::LimitReached);
            }

            let rendered = self.rendered_count().await;
            if self.cursor.item_index_on_page >= rendered {
                if self.try_lazy_load(rendered).await {
                    continue;
                }
                return Ok(PageEnd::Complete);
            }

            self.rendered = rendered;
            let index = self.cursor.item_index_on_page;
            let outcome = self.process_item(index).await?;
            self.cursor.advance();
            self.after_item(&outcome).await?;
        }
    }

    /// Run one row to a terminal outcome. `Err` only for fatal errors.
    async fn process_item(&mut self, index: usize) -> Result<ItemOutcome, AutomationError> {
        let Some(row) = self.row_at(index).await else {
            return Ok(ItemOutcome::Abandoned {
                identity: String::new(),
                reason: format!("row {} vanished", index + 1),
            });
        };
        let identity = self.locator.extract_identity(&row).await;
        drop(row);

        if !identity.is_empty() && self.checkpoint.is_processed(&identity) {
            debug!("engine: skip `{}` (already processed)", identity);
            self.report.skipped += 1;
            return Ok(ItemOutcome::Skipped { identity });
        }

        let label = if identity.is_empty() {
            format!("item {} on page {}", index + 1, self.cursor.page_index)
        } else {
            identity.clone()
        };
        info!("engine: item {} `{}`", index + 1, label);

        let mut attempts = 0u32;
        let mut obstructions = 0u32;
        loop {
            self.suspend().await?;
            let (class, reason, error) = match self.attempt_item(index, &identity, &label).await {
                Ok(StepOutcome::Success(path)) => {
                    return Ok(self.record_success(&identity, &label, path).await?);
                }
                Ok(StepOutcome::Permanent(reason)) => {
                    return Ok(self.record_failure(&identity, &label, reason).await?);
                }
                Ok(StepOutcome::Retryable(reason)) => (ErrorClass::TimeoutOrNotFound, reason, None),
                Err(e) => (e.class(), e.to_string(), Some(e)),
            };

            match class {
                ErrorClass::TransientObstruction => {
                    obstructions += 1;
                    warn!(
                        "engine: `{}` obstructed ({}/{}): {}",
                        label, obstructions, self.settings.obstruction_retries, reason
                    );
                    self.reload_recovery(index).await?;
                    if obstructions >= self.settings.obstruction_retries {
                        return Ok(self
                            .record_failure(
                                &identity,
                                &label,
                                format!("Still obstructed after {} reloads: {}", obstructions, reason),
                            )
                            .await?);
                    }
                }
                ErrorClass::ContextLoss => {
                    attempts += 1;
                    warn!("engine: context lost while on `{}`: {}", label, reason);
                    self.context_recovery(index).await?;
                    if attempts >= self.settings.item_retries {
                        return Ok(self.record_failure(&identity, &label, reason).await?);
                    }
                }
                ErrorClass::TimeoutOrNotFound => {
                    attempts += 1;
                    if attempts >= self.settings.item_retries {
                        return Ok(self
                            .record_failure(
                                &identity,
                                &label,
                                format!("Gave up after {} attempts: {}", attempts, reason),
                            )
                            .await?);
                    }
                    debug!(
                        "engine: `{}` attempt {}/{} failed: {}",
                        label, attempts, self.settings.item_retries, reason
                    );
                    self.rest(self.settings.retry_backoff()).await?;
                }
                ErrorClass::PermanentItem => {
                    return Ok(self.record_failure(&identity, &label, reason).await?);
                }
                ErrorClass::Unclassified => {
                    warn!("engine: unexpected error on `{}`: {}", label, reason);
                    self.emit(EngineEvent::log(
                        Severity::Warning,
                        format!("Skipping {} after unexpected error: {}", label, reason),
                    ));
                    if !identity.is_empty() {
                        self.checkpoint.processed_item_keys.insert(identity.clone());
                    }
                    return Ok(ItemOutcome::Abandoned { identity, reason });
                }
                ErrorClass::Fatal => {
                    return Err(error.unwrap_or(AutomationError::RecoveryFailed(reason)));
                }
            }
        }
    }

    /// One pass of Select → AwaitDetailSync → LocateAction → Invoke.
    async fn attempt_item(
        &mut self,
        index: usize,
        identity: &str,
        label: &str,
    ) -> Result<StepOutcome<PathBuf>, AutomationError> {
        self.check_context().await?;
        if self.locator.is_obstructed().await {
            return Err(AutomationError::Obstruction(
                "interstitial showing before selection".to_string(),
            ));
        }
        let row = match self.find_row(index, identity).await? {
            StepOutcome::Success(row) => row,
            StepOutcome::Retryable(r) => return Ok(StepOutcome::Retryable(r)),
            StepOutcome::Permanent(r) => return Ok(StepOutcome::Permanent(r)),
        };
        match self.select(&row, identity).await? {
            StepOutcome::Success(()) => {}
            StepOutcome::Retryable(r) => return Ok(StepOutcome::Retryable(r)),
            StepOutcome::Permanent(r) => return Ok(StepOutcome::Permanent(r)),
        }
        let control = self.locate_action().await?;
        let path = self.invoke(&control, label).await?;
        Ok(StepOutcome::Success(path))
    }

    async fn record_success(
        &mut self,
        identity: &str,
        label: &str,
        path: PathBuf,
    ) -> Result<ItemOutcome, AutomationError> {
        if !identity.is_empty() {
            self.checkpoint
                .processed_item_keys
                .insert(identity.to_string());
        }
        self.checkpoint.success_count += 1;
        self.report.success += 1;
        self.run_successes += 1;
        self.unsaved_successes += 1;
        info!("engine: saved `{}` → {}", label, path.display());
        self.emit(EngineEvent::log(
            Severity::Success,
            format!("Saved {}", label),
        ));
        self.emit(EngineEvent::progress(
            self.checkpoint.success_count,
            self.progress_total(),
        ));
        if self.unsaved_successes >= self.settings.checkpoint_every.max(1) {
            self.save().await?;
        }
        Ok(ItemOutcome::Succeeded {
            identity: identity.to_string(),
            path,
        })
    }

    async fn record_failure(
        &mut self,
        identity: &str,
        label: &str,
        reason: String,
    ) -> Result<ItemOutcome, AutomationError> {
        let record = FailureRecord::new(label, reason, self.cursor.page_index);
        warn!("engine: `{}` failed: {}", label, record.reason);
        if !identity.is_empty() {
            self.checkpoint
                .processed_item_keys
                .insert(identity.to_string());
        }
        self.checkpoint.failed_items.push(record.clone());
        self.report.failed += 1;
        self.report.failures.push(record.clone());
        self.emit(EngineEvent::Failure {
            failure: record.clone(),
        });
        self.save().await?;
        Ok(ItemOutcome::Failed(record))
    }

    /// Pacing, idle simulation and long breaks between items.
    async fn after_item(&mut self, outcome: &ItemOutcome) -> Result<(), AutomationError> {
        if matches!(outcome, ItemOutcome::Skipped { .. }) {
            return Ok(());
        }

        let wait = {
            let mut input = self.input.lock().await;
            input.pick_duration(
                Duration::from_secs_f64(self.job.min_wait_secs.max(0.0)),
                Duration::from_secs_f64(self.job.max_wait_secs.max(0.0)),
            )
        };
        self.rest(wait).await?;

        {
            let mut input = self.input.lock().await;
            if input.chance(self.settings.idle_probability) {
                if let Err(e) = input.idle_drift(self.ctx.as_ref()).await {
                    debug!("engine: idle drift failed: {}", e);
                }
            }
        }

        if let (ItemOutcome::Succeeded { .. }, Some(every)) = (outcome, self.job.break_interval()) {
            if self.run_successes > 0 && self.run_successes % every as u64 == 0 {
                let pause = {
                    let mut input = self.input.lock().await;
                    input.pick_duration(
                        Duration::from_secs(self.job.break_min_secs),
                        Duration::from_secs(self.job.break_max_secs),
                    )
                };
                info!(
                    "engine: taking a {:?} break after {} successes",
                    pause, self.run_successes
                );
                self.emit(EngineEvent::log(
                    Severity::Info,
                    format!("Taking a break for {}s", pause.as_secs()),
                ));
                self.save().await?;
                self.rest(pause).await?;
            }
        }
        Ok(())
    }

    /// Suspension point. Saves once when a pause is first observed and again
    /// when a stop is observed.
    async fn suspend(&mut self) -> Result<(), AutomationError> {
        if self.control.is_paused() && !self.pause_saved {
            self.save().await?;
            self.pause_saved = true;
            info!("engine: paused");
            self.emit(EngineEvent::log(Severity::Info, "Paused"));
        }
        match self.control.checkpoint().await {
            Ok(()) => {
                if self.pause_saved {
                    info!("engine: resumed");
                    self.emit(EngineEvent::log(Severity::Info, "Resumed"));
                    self.pause_saved = false;
                }
                Ok(())
            }
            Err(e) => {
                self.save().await?;
                Err(e)
            }
        }
    }

    /// Sleep for `total`, waking early when stopped.
    async fn rest(&mut self, total: Duration) -> Result<(), AutomationError> {
        let mut left = total;
        while !left.is_zero() {
            if self.control.is_stopped() {
                return self.suspend().await;
            }
            let slice = left.min(REST_SLICE);
            tokio::time::sleep(slice).await;
            left = left.saturating_sub(slice);
        }
        Ok(())
    }

    async fn save(&mut self) -> Result<(), AutomationError> {
        let saved = self.store.save(&CheckpointPatch::from(&self.checkpoint))?;
        debug!(
            "checkpoint: {} processed, {} succeeded, page {}",
            saved.processed_item_keys.len(),
            saved.success_count,
            saved.current_page
        );
        self.unsaved_successes = 0;
        Ok(())
    }

    fn limit_reached(&self) -> bool {
        self.job
            .max_items
            .is_some_and(|max| self.checkpoint.success_count >= max)
    }

    /// The item limit, or what is known so far: everything processed plus
    /// the rows still ahead on this page.
    fn progress_total(&self) -> u64 {
        let ahead = self
            .rendered
            .saturating_sub(self.cursor.item_index_on_page + 1) as u64;
        self.job
            .max_items
            .unwrap_or(self.checkpoint.processed_item_keys.len() as u64 + ahead)
    }

    fn emit(&self, event: EngineEvent) {
        self.events.emit(event);
    }

    async fn rendered_count(&self) -> usize {
        match self.locator.locate_all(Role::ListItem).await {
            Ok(rows) => rows.len(),
            Err(e) => {
                debug!("engine: row count unavailable: {}", e);
                0
            }
        }
    }

    async fn row_at(&self, index: usize) -> Option<ElementHandle> {
        self.locator
            .locate_all(Role::ListItem)
            .await
            .ok()
            .and_then(|mut rows| (index < rows.len()).then(|| rows.swap_remove(index)))
    }

    /// The row to act on: the one at `index` when it still carries
    /// `identity`, otherwise wherever `identity` re-rendered.
    async fn find_row(
        &self,
        index: usize,
        identity: &str,
    ) -> Result<StepOutcome<ElementHandle>, AutomationError> {
        let rows = self.locator.locate_all(Role::ListItem).await?;
        if let Some(row) = rows.get(index) {
            if identity.is_empty() || self.locator.extract_identity(row).await == identity {
                return Ok(StepOutcome::Success(Arc::clone(row)));
            }
        }
        for row in &rows {
            if !identity.is_empty() && self.locator.extract_identity(row).await == identity {
                debug!("engine: `{}` moved away from row {}", identity, index + 1);
                return Ok(StepOutcome::Success(Arc::clone(row)));
            }
        }
        Ok(StepOutcome::Retryable(format!(
            "row {} ({}) is no longer rendered",
            index + 1,
            if identity.is_empty() { "unnamed" } else { identity }
        )))
    }
}
