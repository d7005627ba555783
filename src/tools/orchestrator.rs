//! Session setup → start position → engine run → teardown.

use crate::core::config::CourierConfig;
use crate::core::types::{Checkpoint, RunReport};
use crate::features::checkpoint_store::CheckpointStore;
use crate::features::control::RunControl;
use crate::features::events::{EngineEvent, EventSink, Severity, TracingSink};
use crate::features::humanize::SharedInput;
use crate::scraping::dom::BrowsingContext;
use crate::scraping::locator::{ElementLocator, Role};
use crate::tools::engine::{ActionInvoker, ListProcessingEngine};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Supplies an authenticated browsing context and tears it down afterwards.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn BrowsingContext>>;

    async fn close(&self, ctx: Arc<dyn BrowsingContext>) -> Result<()>;
}

pub struct RunOrchestrator {
    config: CourierConfig,
    provider: Arc<dyn SessionProvider>,
    store: CheckpointStore,
    events: Arc<dyn EventSink>,
    control: RunControl,
    invoker: Option<Arc<dyn ActionInvoker>>,
    input: Option<SharedInput>,
    navigation_budget: Duration,
}

impl RunOrchestrator {
    pub fn new(config: CourierConfig, provider: Arc<dyn SessionProvider>) -> Self {
        let store = CheckpointStore::new(config.resolve_checkpoint_path());
        Self {
            config,
            provider,
            store,
            events: Arc::new(TracingSink),
            control: RunControl::new(),
            invoker: None,
            input: None,
            navigation_budget: Duration::from_secs(60),
        }
    }

    pub fn with_store(mut self, store: CheckpointStore) -> Self {
        self.store = store;
        self
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
        self.invoker = Some(invoker);
        self
    }

    pub fn with_input(mut self, input: SharedInput) -> Self {
        self.input = Some(input);
        self
    }

    /// Total time allowed for retrying the initial navigation.
    pub fn with_navigation_budget(mut self, budget: Duration) -> Self {
        self.navigation_budget = budget;
        self
    }

    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Run the job end to end. The session is closed on every path; the
    /// checkpoint survives fatal errors for a later resume.
    pub async fn run(&self) -> Result<RunReport> {
        self.config.validate().context("invalid job configuration")?;
        let checkpoint = self.prepare_checkpoint()?;

        let ctx = self
            .provider
            .open()
            .await
            .context("failed to open browsing session")?;
        let result = self.drive(Arc::clone(&ctx), checkpoint).await;
        if let Err(e) = self.provider.close(ctx).await {
            warn!("orchestrator: session teardown failed: {:#}", e);
        }

        match &result {
            Ok(report) => info!(
                "orchestrator: run finished ({} ok, {} failed, {} skipped)",
                report.success, report.failed, report.skipped
            ),
            Err(e) => {
                warn!("orchestrator: run aborted: {:#}", e);
                self.events
                    .emit(EngineEvent::log(Severity::Error, format!("{:#}", e)));
            }
        }
        result
    }

    /// Resumed state, or a fresh checkpoint. A stored checkpoint is only
    /// deleted on an explicit reset; without `resume` or `reset` its
    /// presence refuses the run.
    fn prepare_checkpoint(&self) -> Result<Checkpoint> {
        let job = &self.config.job;
        let output = job.output_dir.display().to_string();

        let stored = if job.reset {
            info!("orchestrator: reset requested, clearing {}", self.store.path().display());
            self.store.reset().context("failed to clear checkpoint")?;
            None
        } else if job.resume {
            self.store.load().context("failed to read checkpoint")?
        } else if self.store.exists() {
            return Err(anyhow!(
                "a checkpoint already exists at {}; pass --resume to continue it or --reset to start over",
                self.store.path().display()
            ));
        } else {
            None
        };

        let mut checkpoint = match stored {
            Some(cp) => {
                if !cp.source_list_url.is_empty() && cp.source_list_url != job.source_list_url {
                    warn!(
                        "orchestrator: checkpoint was recorded for {}, resuming against {}",
                        cp.source_list_url, job.source_list_url
                    );
                }
                info!(
                    "orchestrator: resuming: {} processed, {} succeeded, page {}",
                    cp.processed_item_keys.len(),
                    cp.success_count,
                    cp.current_page
                );
                cp
            }
            None => {
                info!("orchestrator: starting a new job");
                Checkpoint::new(&job.source_list_url, &output, &job.item_label)
            }
        };
        checkpoint.source_list_url = job.source_list_url.clone();
        checkpoint.output_location = output;
        checkpoint.item_label = job.item_label.clone();
        if checkpoint.current_page == 0 {
            checkpoint.current_page = 1;
        }
        if let Some(start) = job.start_page {
            checkpoint.current_page = start;
        }
        Ok(checkpoint)
    }

    async fn drive(&self, ctx: Arc<dyn BrowsingContext>, checkpoint: Checkpoint) -> Result<RunReport> {
        let url = self.config.job.source_list_url.clone();
        retry(
            ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(500))
                .with_max_interval(Duration::from_secs(8))
                .with_max_elapsed_time(Some(self.navigation_budget))
                .build(),
            || async {
                match ctx.navigate(&url).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        warn!("orchestrator: navigation to {} failed: {}", url, e);
                        Err(backoff::Error::transient(e))
                    }
                }
            },
        )
        .await
        .with_context(|| format!("could not open the source list {}", url))?;

        let locator = Arc::new(
            ElementLocator::new(Arc::clone(&ctx), self.config.selectors.clone())
                .context("invalid selector profile")?,
        );
        if locator
            .wait_for(Role::ListContainer, self.config.engine.list_attach_timeout())
            .await
            .is_none()
        {
            return Err(anyhow!("list container never appeared at {}", url));
        }

        let start_page = checkpoint.current_page;
        let mut engine = ListProcessingEngine::new(
            locator,
            self.store.clone(),
            self.config.job.clone(),
            self.config.engine.clone(),
            checkpoint,
        )
        .with_events(Arc::clone(&self.events))
        .with_control(self.control.clone());
        if let Some(invoker) = &self.invoker {
            engine = engine.with_invoker(Arc::clone(invoker));
        }
        if let Some(input) = &self.input {
            engine = engine.with_input(Arc::clone(input));
        }

        if start_page > 1 {
            let seek = engine.navigator().seek(start_page).await;
            if !seek.reached {
                self.events.emit(EngineEvent::log(
                    Severity::Warning,
                    format!(
                        "Could not reach page {}, starting from page {}",
                        start_page, seek.page
                    ),
                ));
            }
        }

        let report = engine.run().await.context("list processing aborted")?;
        Ok(report)
    }
}
