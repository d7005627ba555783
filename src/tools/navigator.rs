//! Position tracking and movement through a windowed paginator.
//!
//! The paginator only renders a sliding window of page numbers (plus
//! ellipsis expanders), so reaching an arbitrary page means repeatedly
//! jumping to the furthest visible number in the right direction.

use crate::core::config::EngineSettings;
use crate::features::humanize::SharedInput;
use crate::scraping::dom::{wait_until, ElementHandle};
use crate::scraping::locator::{clean_label, ElementLocator, Role};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One rendered paginator entry.
pub struct PageButton {
    pub handle: ElementHandle,
    pub label: String,
    /// `None` for arrows, ellipses and other non-numeric entries.
    pub number: Option<u32>,
}

/// Where a [`PageNavigator::seek`] ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekOutcome {
    pub page: u32,
    pub reached: bool,
}

fn parse_page_number(label: &str) -> Option<u32> {
    let digits: String = label.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || digits.len() != label.chars().filter(|c| !c.is_whitespace()).count() {
        return None;
    }
    digits.parse().ok()
}

pub struct PageNavigator {
    locator: Arc<ElementLocator>,
    input: SharedInput,
    poll: Duration,
    advance_timeout: Duration,
    seek_timeout: Duration,
    seek_max_iterations: u32,
}

impl PageNavigator {
    pub fn new(locator: Arc<ElementLocator>, input: SharedInput, settings: &EngineSettings) -> Self {
        Self {
            locator,
            input,
            poll: settings.poll(),
            advance_timeout: settings.advance_timeout(),
            seek_timeout: settings.seek_timeout(),
            seek_max_iterations: settings.seek_max_iterations,
        }
    }

    pub(crate) fn set_input(&mut self, input: SharedInput) {
        self.input = input;
    }

    /// Active page number; 1 when the indicator is missing or unreadable.
    pub async fn get_active_page(&self) -> u32 {
        match self.locator.locate(Role::ActivePage).await {
            Ok(Some(el)) => match el.text().await {
                Ok(text) => parse_page_number(&clean_label(&text)).unwrap_or(1),
                Err(e) => {
                    debug!("navigator: active page unreadable: {}", e);
                    1
                }
            },
            Ok(None) => 1,
            Err(e) => {
                debug!("navigator: active page lookup failed: {}", e);
                1
            }
        }
    }

    /// Enabled paginator entries in render order.
    pub async fn page_buttons(&self) -> Vec<PageButton> {
        let handles = match self.locator.locate_all(Role::PageButton).await {
            Ok(h) => h,
            Err(e) => {
                debug!("navigator: page buttons unavailable: {}", e);
                return Vec::new();
            }
        };
        let mut buttons = Vec::with_capacity(handles.len());
        for handle in handles {
            if handle.is_disabled().await.unwrap_or(false) {
                continue;
            }
            let label = clean_label(&handle.text().await.unwrap_or_default());
            let number = parse_page_number(&label);
            buttons.push(PageButton {
                handle,
                label,
                number,
            });
        }
        buttons
    }

    /// True when the active page is not the last rendered page button.
    pub async fn has_next(&self) -> bool {
        let active = self.get_active_page().await;
        let buttons = self.page_buttons().await;
        match buttons.iter().position(|b| b.number == Some(active)) {
            Some(i) => i + 1 < buttons.len(),
            None => false,
        }
    }

    /// Move one page forward. Returns whether the active page increased.
    pub async fn advance(&self) -> bool {
        let before = self.get_active_page().await;

        let next = match self.locator.locate(Role::NextPage).await {
            Ok(Some(el)) if !el.is_disabled().await.unwrap_or(true) => Some(el),
            _ => None,
        };
        let target = match next {
            Some(el) => el,
            None => {
                let buttons = self.page_buttons().await;
                let Some(i) = buttons.iter().position(|b| b.number == Some(before)) else {
                    warn!("navigator: active page {} not among page buttons", before);
                    return false;
                };
                let Some(following) = buttons.into_iter().nth(i + 1) else {
                    debug!("navigator: page {} is the last page", before);
                    return false;
                };
                debug!("navigator: advancing via button `{}`", following.label);
                following.handle
            }
        };

        if let Err(e) = self.click(&target).await {
            warn!("navigator: advance click failed: {}", e);
            return false;
        }

        let reached = wait_until(self.advance_timeout, self.poll, move || async move {
            let now = self.get_active_page().await;
            Ok((now > before).then_some(now))
        })
        .await;

        match reached {
            Some(page) => {
                info!("navigator: advanced {} → {}", before, page);
                true
            }
            None => {
                warn!(
                    "navigator: page did not advance from {} within {:?}",
                    before, self.advance_timeout
                );
                false
            }
        }
    }

    /// Bring `target` into the active position, jumping through the windowed
    /// paginator. Best effort: stops with a warning when the target cannot be
    /// reached within the iteration bound.
    pub async fn seek(&self, target: u32) -> SeekOutcome {
        let mut current = self.get_active_page().await;
        for iteration in 0..self.seek_max_iterations {
            if current == target {
                info!("navigator: at page {}", target);
                return SeekOutcome {
                    page: current,
                    reached: true,
                };
            }

            let buttons = self.page_buttons().await;
            let moved = if let Some(direct) = buttons.iter().find(|b| b.number == Some(target)) {
                debug!("navigator: page {} visible, clicking", target);
                self.click_and_wait(&direct.handle, current, Some(target), self.seek_timeout)
                    .await
            } else if let Some(jump) = jump_candidate(&buttons, current, target) {
                debug!(
                    "navigator: jump {} → {} towards {} (iteration {})",
                    current, jump.label, target, iteration
                );
                self.click_and_wait(&jump.handle, current, None, self.seek_timeout)
                    .await
            } else if target > current {
                self.advance().await
            } else {
                false
            };

            if !moved {
                break;
            }
            current = self.get_active_page().await;
        }

        if current == target {
            return SeekOutcome {
                page: current,
                reached: true,
            };
        }
        warn!(
            "navigator: could not reach page {}; continuing from page {}",
            target, current
        );
        SeekOutcome {
            page: current,
            reached: false,
        }
    }

    async fn click(&self, el: &ElementHandle) -> Result<(), crate::core::error::DomError> {
        let ctx = self.locator.context();
        let mut input = self.input.lock().await;
        match input.click_element(ctx.as_ref(), el).await {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!("navigator: humanized click failed ({}), forcing", e);
                el.click().await
            }
        }
    }

    /// Click `el` and wait until the active page leaves `from` (and equals
    /// `expect`, when given).
    async fn click_and_wait(
        &self,
        el: &ElementHandle,
        from: u32,
        expect: Option<u32>,
        timeout: Duration,
    ) -> bool {
        if let Err(e) = self.click(el).await {
            warn!("navigator: click failed: {}", e);
            return false;
        }
        wait_until(timeout, self.poll, move || async move {
            let now = self.get_active_page().await;
            let done = match expect {
                Some(page) => now == page,
                None => now != from,
            };
            Ok(done.then_some(()))
        })
        .await
        .is_some()
    }
}

/// Visible page number strictly between `current` and `target`, as close to
/// `target` as possible.
fn jump_candidate(buttons: &[PageButton], current: u32, target: u32) -> Option<&PageButton> {
    let between = buttons.iter().filter(|b| match b.number {
        Some(n) if target > current => n > current && n < target,
        Some(n) => n < current && n > target,
        None => false,
    });
    if target > current {
        between.max_by_key(|b| b.number)
    } else {
        between.min_by_key(|b| b.number)
    }
}
