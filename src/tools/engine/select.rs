use super::ListProcessingEngine;
use crate::core::error::AutomationError;
use crate::core::types::StepOutcome;
use crate::scraping::dom::{wait_until, ElementHandle};
use crate::scraping::locator::Role;
use crate::tools::matching::{contains_identity, fuzzy_match, normalize};
use std::sync::Arc;
use tracing::debug;

/// Attempts from this index on use a synthetic click.
const FORCED_CLICK_FROM: u32 = 2;

impl ListProcessingEngine {
    /// Click the row until the detail view reflects it.
    ///
    /// Even attempts aim at the row's precise target, odd ones at the whole
    /// row. Early attempts move the pointer like a person; later ones fire a
    /// synthetic click that ignores overlays. Running out of attempts is a
    /// permanent failure for the item: the outer retry loop does not
    /// multiply these clicks.
    pub(super) async fn select(
        &mut self,
        row: &ElementHandle,
        identity: &str,
    ) -> Result<StepOutcome<()>, AutomationError> {
        let attempts = self.settings.select_attempts.max(1);
        for attempt in 0..attempts {
            self.suspend().await?;

            let target = if attempt % 2 == 0 {
                match self.locator.locate_within(row, Role::ItemTarget).await {
                    Ok(Some(t)) => t,
                    _ => Arc::clone(row),
                }
            } else {
                Arc::clone(row)
            };

            let before = self.detail_snapshot().await;
            let clicked = if attempt >= FORCED_CLICK_FROM {
                match target.scroll_into_view().await {
                    Ok(()) => target.click().await,
                    Err(e) => Err(e),
                }
            } else {
                let mut input = self.input.lock().await;
                input.click_element(self.ctx.as_ref(), &target).await
            };
            if let Err(e) = clicked {
                debug!("engine: select attempt {} click failed: {}", attempt + 1, e);
                tokio::time::sleep(self.settings.settle()).await;
                continue;
            }

            if self.await_detail_sync(identity, before.as_deref()).await {
                if attempt > 0 {
                    debug!("engine: selection confirmed on attempt {}", attempt + 1);
                }
                return Ok(StepOutcome::Success(()));
            }
            debug!(
                "engine: select attempt {}/{} not reflected in detail view",
                attempt + 1,
                attempts
            );
        }
        Ok(StepOutcome::Permanent(format!(
            "Selection not confirmed after {} attempts",
            attempts
        )))
    }

    /// Current detail view text, `None` while it is detached.
    async fn detail_snapshot(&self) -> Option<String> {
        match self.locator.locate(Role::DetailView).await {
            Ok(Some(view)) => view.text().await.ok(),
            _ => None,
        }
    }

    /// Wait for the detail view to attach and then to show `identity`.
    ///
    /// `before` is the view's text from just before the click. While the
    /// view still shows exactly that text only a heading equal to
    /// `identity` confirms; containment and the fuzzy heading match need a
    /// view that changed. An empty identity is confirmed by attachment alone.
    pub(super) async fn await_detail_sync(&self, identity: &str, before: Option<&str>) -> bool {
        if self
            .locator
            .wait_for(Role::DetailView, self.settings.detail_attach_timeout())
            .await
            .is_none()
        {
            debug!("engine: detail view did not attach");
            return false;
        }
        if identity.is_empty() {
            return true;
        }

        let locator = &self.locator;
        let threshold = self.settings.fuzzy_match_threshold;
        wait_until(
            self.settings.detail_match_timeout(),
            self.settings.poll(),
            move || async move {
                let Some(view) = locator.locate(Role::DetailView).await? else {
                    return Ok(None);
                };
                let text = view.text().await?;
                let heading = detail_heading(&text);
                if before == Some(text.as_str()) {
                    return Ok((normalize(&heading) == normalize(identity)).then_some(()));
                }
                let matched = contains_identity(&text, identity)
                    || fuzzy_match(&heading, identity, threshold);
                Ok(matched.then_some(()))
            },
        )
        .await
        .is_some()
    }
}

/// First non-empty line of the detail view, where the title sits.
fn detail_heading(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}
