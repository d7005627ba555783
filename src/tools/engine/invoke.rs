use super::ListProcessingEngine;
use crate::core::error::{AutomationError, DomError};
use crate::scraping::dom::{BrowsingContext, ElementHandle};
use crate::scraping::locator::Role;
use crate::tools::artifacts::unique_artifact_path;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const NO_ACTION_CONTROL: &str = "No action control found";

/// Turns a clicked action control into a file on disk.
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    /// Wait up to `timeout` for the artifact the last click produced and
    /// write it to `dest`.
    async fn collect(
        &self,
        ctx: &dyn BrowsingContext,
        dest: &Path,
        timeout: Duration,
    ) -> Result<(), AutomationError>;
}

/// Collects the browser download triggered by the click.
#[derive(Debug, Default, Clone, Copy)]
pub struct DownloadInvoker;

#[async_trait]
impl ActionInvoker for DownloadInvoker {
    async fn collect(
        &self,
        ctx: &dyn BrowsingContext,
        dest: &Path,
        timeout: Duration,
    ) -> Result<(), AutomationError> {
        let artifact = ctx.await_artifact(timeout).await?;
        if let Some(name) = artifact.suggested_filename() {
            debug!("engine: artifact `{}` → {}", name, dest.display());
        }
        artifact.save_to(dest).await?;
        Ok(())
    }
}

/// Same host and path as the source list; query and fragment may differ.
pub(super) fn on_list_view(current: &str, source: &str) -> bool {
    match (url::Url::parse(current), url::Url::parse(source)) {
        (Ok(c), Ok(s)) => {
            c.host_str() == s.host_str()
                && c.path().trim_end_matches('/') == s.path().trim_end_matches('/')
        }
        _ => current.starts_with(source),
    }
}

impl ListProcessingEngine {
    /// Action control inside the current detail view.
    pub(super) async fn locate_action(&self) -> Result<ElementHandle, AutomationError> {
        let Some(view) = self.locator.locate(Role::DetailView).await? else {
            return Err(AutomationError::NotFound(
                "detail view detached before the action control was found".to_string(),
            ));
        };
        self.locator
            .locate_within(&view, Role::ActionControl)
            .await?
            .ok_or_else(|| AutomationError::ActionUnavailable(NO_ACTION_CONTROL.to_string()))
    }

    /// Click the control and wait for the artifact, watching for the scan
    /// interstitial and for the tab wandering off the list.
    pub(super) async fn invoke(
        &self,
        control: &ElementHandle,
        label: &str,
    ) -> Result<PathBuf, AutomationError> {
        let dest = unique_artifact_path(&self.job.output_dir, label, &self.settings.artifact_suffix);

        let stale = self.ctx.discard_pending_artifacts().await;
        if stale > 0 {
            warn!("engine: dropped {} unclaimed download(s) before `{}`", stale, label);
        }
        {
            let mut input = self.input.lock().await;
            if let Err(e) = input.click_element(self.ctx.as_ref(), control).await {
                debug!("engine: humanized action click failed ({}), forcing", e);
                control.click().await?;
            }
        }

        let collect = self
            .invoker
            .collect(self.ctx.as_ref(), &dest, self.settings.artifact_timeout());
        let collected = tokio::select! {
            r = collect => r,
            interrupted = self.watch_interruptions() => Err(interrupted),
        };

        match collected {
            Ok(()) => {
                info!("engine: artifact written to {}", dest.display());
                Ok(dest)
            }
            Err(AutomationError::Dom(DomError::ArtifactTimeout(waited))) => {
                // The interstitial may have appeared right at the deadline.
                if self.locator.is_obstructed().await {
                    return Err(AutomationError::Obstruction(format!(
                        "interstitial shown instead of `{}`",
                        label
                    )));
                }
                self.check_context().await?;
                Err(AutomationError::Timeout(format!(
                    "no artifact for `{}` within {:?}",
                    label, waited
                )))
            }
            Err(e) => Err(e),
        }
    }

    /// Resolves once the page shows the obstruction or leaves the list.
    async fn watch_interruptions(&self) -> AutomationError {
        let poll = self.settings.poll();
        loop {
            tokio::time::sleep(poll).await;
            if self.locator.is_obstructed().await {
                return AutomationError::Obstruction(
                    "remote scan interstitial is showing".to_string(),
                );
            }
            if let Err(e) = self.check_context().await {
                return e;
            }
        }
    }

    /// `Err(ContextLost)` when the tab is no longer on the source list.
    pub(super) async fn check_context(&self) -> Result<(), AutomationError> {
        match self.ctx.current_url().await {
            Ok(url) if !on_list_view(&url, &self.job.source_list_url) => {
                Err(AutomationError::ContextLost { url })
            }
            Ok(_) => Ok(()),
            Err(DomError::SessionClosed) => Err(DomError::SessionClosed.into()),
            Err(e) => {
                debug!("engine: current url unavailable: {}", e);
                Ok(())
            }
        }
    }
}
