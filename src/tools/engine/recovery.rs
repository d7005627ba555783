use super::ListProcessingEngine;
use crate::core::error::AutomationError;
use crate::scraping::dom::wait_until;
use crate::scraping::locator::Role;
use tracing::{debug, info, warn};

/// Scroll nudges per lazy-load attempt before the page counts as exhausted.
const LAZY_LOAD_NUDGES: u32 = 3;

impl ListProcessingEngine {
    /// Scroll the list container and the window to the bottom.
    async fn nudge_lazy_load(&self) {
        match self.locator.locate(Role::ListContainer).await {
            Ok(Some(container)) => {
                if let Err(e) = container.scroll_to_bottom().await {
                    debug!("engine: container scroll failed: {}", e);
                }
            }
            Ok(None) => debug!("engine: no list container to scroll"),
            Err(e) => debug!("engine: list container lookup failed: {}", e),
        }
        if let Err(e) = self.ctx.scroll_window_to_bottom().await {
            debug!("engine: window scroll failed: {}", e);
        }
    }

    /// Trigger lazy loading and report whether more than `rendered` rows
    /// appeared.
    pub(super) async fn try_lazy_load(&self, rendered: usize) -> bool {
        for nudge in 1..=LAZY_LOAD_NUDGES {
            self.nudge_lazy_load().await;
            let grown = wait_until(
                self.settings.lazy_load_settle(),
                self.settings.poll(),
                move || async move {
                    let now = self.rendered_count().await;
                    Ok((now > rendered).then_some(now))
                },
            )
            .await;
            if let Some(now) = grown {
                debug!("engine: lazy load {} → {} rows (nudge {})", rendered, now, nudge);
                return true;
            }
        }
        debug!("engine: no growth past {} rows", rendered);
        false
    }

    /// Scroll until more than `target_index` rows are rendered.
    ///
    /// A run of `stagnation_limit` polls without growth forces a reload;
    /// after `max_scroll_attempts` nudges recovery has failed.
    pub(super) async fn list_recovery(&mut self, target_index: usize) -> Result<(), AutomationError> {
        let mut last = self.rendered_count().await;
        let mut stagnant = 0u32;
        for attempt in 0..self.settings.max_scroll_attempts {
            if last > target_index {
                debug!(
                    "engine: list restored to {} rows after {} nudges",
                    last, attempt
                );
                return Ok(());
            }
            self.nudge_lazy_load().await;
            tokio::time::sleep(self.settings.lazy_load_settle()).await;

            let now = self.rendered_count().await;
            if now > last {
                stagnant = 0;
                last = now;
                continue;
            }
            stagnant += 1;
            if stagnant >= self.settings.stagnation_limit {
                warn!(
                    "engine: list stuck at {} rows (need {}), reloading",
                    now,
                    target_index + 1
                );
                self.reload_view().await?;
                stagnant = 0;
                last = self.rendered_count().await;
            }
        }
        if last > target_index {
            return Ok(());
        }
        Err(AutomationError::RecoveryFailed(format!(
            "list never rendered row {} after {} scroll attempts",
            target_index + 1,
            self.settings.max_scroll_attempts
        )))
    }

    /// Reload, wait for the list, return to the cursor's page.
    async fn reload_view(&mut self) -> Result<(), AutomationError> {
        self.ctx.reload().await?;
        self.reattach().await
    }

    async fn reattach(&mut self) -> Result<(), AutomationError> {
        if self
            .locator
            .wait_for(Role::ListContainer, self.settings.list_attach_timeout())
            .await
            .is_none()
        {
            return Err(AutomationError::RecoveryFailed(
                "list container did not reattach".to_string(),
            ));
        }
        let page = self.cursor.page_index;
        if self.navigator.get_active_page().await != page {
            let seek = self.navigator.seek(page).await;
            if !seek.reached {
                return Err(AutomationError::RecoveryFailed(format!(
                    "could not return to page {} (at {})",
                    page, seek.page
                )));
            }
        }
        Ok(())
    }

    /// Full reload of the view, then restore the row at `index`.
    pub(super) async fn reload_recovery(&mut self, index: usize) -> Result<(), AutomationError> {
        self.report.reload_recoveries += 1;
        info!(
            "engine: reload recovery #{} at row {}",
            self.report.reload_recoveries,
            index + 1
        );
        self.reload_view().await?;
        self.list_recovery(index).await
    }

    /// Navigate back to the source list, then restore the row at `index`.
    pub(super) async fn context_recovery(&mut self, index: usize) -> Result<(), AutomationError> {
        self.report.context_recoveries += 1;
        info!(
            "engine: context recovery #{}, returning to {}",
            self.report.context_recoveries, self.job.source_list_url
        );
        let url = self.job.source_list_url.clone();
        if let Err(e) = self.ctx.navigate(&url).await {
            return Err(AutomationError::RecoveryFailed(format!(
                "could not return to the list: {}",
                e
            )));
        }
        self.reattach().await?;
        self.list_recovery(index).await
    }
}
