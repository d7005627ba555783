//! Browser capability interface.
//!
//! The engine, locator and navigator only ever talk to these traits. The
//! production implementation wraps `chromiumoxide` (see
//! [`super::browser_manager::ChromeSession`]); tests use an in-memory fake.

use crate::core::error::DomError;
use crate::core::types::{Point, Region, Viewport};
use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type DomResult<T> = Result<T, DomError>;

/// A live element in the remote document.
#[async_trait]
pub trait Element: Send + Sync {
    /// First descendant matching `selector`.
    async fn query(&self, selector: &str) -> DomResult<Option<ElementHandle>>;

    async fn query_all(&self, selector: &str) -> DomResult<Vec<ElementHandle>>;

    /// Rendered text (`innerText`).
    async fn text(&self) -> DomResult<String>;

    async fn attribute(&self, name: &str) -> DomResult<Option<String>>;

    /// `None` when the element is not laid out.
    async fn bounding_region(&self) -> DomResult<Option<Region>>;

    /// Scroll so the element sits in the middle of its scroll container.
    async fn scroll_into_view(&self) -> DomResult<()>;

    /// Synthetic `element.click()`; bypasses hit-testing and overlays.
    async fn click(&self) -> DomResult<()>;

    /// Scroll this element's own scroll box to its end.
    async fn scroll_to_bottom(&self) -> DomResult<()>;

    async fn is_disabled(&self) -> DomResult<bool>;
}

pub type ElementHandle = Arc<dyn Element>;

/// A downloaded file waiting to be moved into place.
#[async_trait]
pub trait Artifact: Send {
    fn suggested_filename(&self) -> Option<String>;

    async fn save_to(self: Box<Self>, path: &Path) -> DomResult<()>;
}

/// One authenticated tab.
#[async_trait]
pub trait BrowsingContext: Send + Sync {
    async fn navigate(&self, url: &str) -> DomResult<()>;

    async fn reload(&self) -> DomResult<()>;

    async fn current_url(&self) -> DomResult<String>;

    async fn query(&self, selector: &str) -> DomResult<Option<ElementHandle>>;

    async fn query_all(&self, selector: &str) -> DomResult<Vec<ElementHandle>>;

    /// Whole-document rendered text.
    async fn body_text(&self) -> DomResult<String>;

    async fn viewport(&self) -> DomResult<Viewport>;

    async fn pointer_move(&self, to: Point) -> DomResult<()>;

    /// Press and release the primary button at `at`.
    async fn pointer_click(&self, at: Point) -> DomResult<()>;

    async fn wheel(&self, at: Point, delta_y: f64) -> DomResult<()>;

    async fn scroll_window_to_bottom(&self) -> DomResult<()>;

    async fn press_key(&self, key: &str) -> DomResult<()>;

    /// Forget every download started so far, finished or still in flight.
    /// Returns how many finished files were dropped.
    async fn discard_pending_artifacts(&self) -> usize;

    /// Wait for the next download started after the last discard.
    async fn await_artifact(&self, timeout: Duration) -> DomResult<Box<dyn Artifact>>;
}

/// Poll `check` every `poll` until it yields `Some`, or give up after `timeout`.
///
/// Errors from `check` count as "not yet": transient CDP failures while the
/// document is re-rendering are expected.
pub async fn wait_until<T, F, Fut>(timeout: Duration, poll: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DomResult<Option<T>>>,
{
    let start = Instant::now();
    loop {
        if let Ok(Some(v)) = check().await {
            return Some(v);
        }
        if start.elapsed() >= timeout {
            return None;
        }
        tokio::time::sleep(poll).await;
    }
}
