//! Native browser session over `chromiumoxide`.
//!
//! This module is the only place that speaks CDP:
//! * Finding a usable Chromium-family executable (cross-platform).
//! * Launching a browser on a persisted profile (the profile carries the
//!   authenticated session cookies).
//! * [`ChromeSession`]: the [`BrowsingContext`] implementation the engine drives.
//! * Download capture: `Browser.setDownloadBehavior` redirects downloads into
//!   a staging directory and the `Browser.downloadProgress` stream surfaces
//!   finished files as [`Artifact`]s.

use crate::core::config::BrowserSettings;
use crate::core::error::DomError;
use crate::core::types::{Point, Region, Viewport as ViewportSize};
use crate::scraping::dom::{Artifact, BrowsingContext, DomResult, Element, ElementHandle};
use crate::tools::orchestrator::SessionProvider;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin, SetDownloadBehaviorBehavior,
    SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams, DispatchMouseEventType,
    MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. PATH scan (package-manager installs on all platforms).
/// 2. OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/usr/bin/brave-browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

// ── Launch config ────────────────────────────────────────────────────────────

/// Injected before any page script runs.
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
if (!window.chrome) { window.chrome = { runtime: {} }; }
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
    window.navigator.permissions.query = (p) =>
        p && p.name === 'notifications'
            ? Promise.resolve({ state: Notification.permission })
            : originalQuery(p);
}
"#;

/// Build a `BrowserConfig` on the persisted profile.
///
/// Flags:
/// * `--disable-blink-features=AutomationControlled` hides the automation flag.
/// * The profile dir keeps cookies between runs, so the login survives.
pub fn build_session_config(settings: &BrowserSettings, exe: &str) -> Result<BrowserConfig> {
    let (width, height) = settings.resolve_window();

    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width,
            height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(width, height)
        .arg("--disable-dev-shm-usage")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--disable-crash-reporter")
        .arg("--disable-blink-features=AutomationControlled");

    if let Some(profile) = settings.resolve_profile_dir() {
        std::fs::create_dir_all(&profile)
            .map_err(|e| anyhow!("Cannot create profile dir {}: {}", profile.display(), e))?;
        builder = builder.user_data_dir(profile);
    }
    if !settings.resolve_headless() {
        builder = builder.with_head();
    }

    builder
        .build()
        .map_err(|e| anyhow!("Failed to build browser config: {}", e))
}

fn cdp_err(context: &str, e: CdpError) -> DomError {
    match e {
        CdpError::Ws(_) | CdpError::ChannelSendError(_) => DomError::SessionClosed,
        other => DomError::Evaluation(format!("{}: {}", context, other)),
    }
}

// ── Elements ─────────────────────────────────────────────────────────────────

struct ChromeElement {
    inner: chromiumoxide::Element,
}

impl ChromeElement {
    fn handle(inner: chromiumoxide::Element) -> ElementHandle {
        Arc::new(Self { inner })
    }

    async fn call(&self, function: &str) -> DomResult<Option<serde_json::Value>> {
        let ret = self
            .inner
            .call_js_fn(function, false)
            .await
            .map_err(|e| match e {
                CdpError::Ws(_) | CdpError::ChannelSendError(_) => DomError::SessionClosed,
                _ => DomError::Detached,
            })?;
        Ok(ret.result.value)
    }
}

#[async_trait]
impl Element for ChromeElement {
    async fn query(&self, selector: &str) -> DomResult<Option<ElementHandle>> {
        Ok(self.query_all(selector).await?.into_iter().next())
    }

    async fn query_all(&self, selector: &str) -> DomResult<Vec<ElementHandle>> {
        let found = self
            .inner
            .find_elements(selector)
            .await
            .map_err(|e| DomError::Query {
                selector: selector.to_string(),
                reason: e.to_string(),
            })?;
        Ok(found.into_iter().map(ChromeElement::handle).collect())
    }

    async fn text(&self) -> DomResult<String> {
        let text = self.inner.inner_text().await.map_err(|_| DomError::Detached)?;
        Ok(text.unwrap_or_default())
    }

    async fn attribute(&self, name: &str) -> DomResult<Option<String>> {
        self.inner
            .attribute(name)
            .await
            .map_err(|_| DomError::Detached)
    }

    async fn bounding_region(&self) -> DomResult<Option<Region>> {
        match self.inner.bounding_box().await {
            Ok(b) => Ok(Some(Region::new(b.x, b.y, b.width, b.height))),
            Err(e) => {
                debug!("browser: no layout box: {}", e);
                Ok(None)
            }
        }
    }

    async fn scroll_into_view(&self) -> DomResult<()> {
        self.call("function() { this.scrollIntoView({ block: 'center', inline: 'nearest' }); }")
            .await?;
        Ok(())
    }

    async fn click(&self) -> DomResult<()> {
        self.call("function() { this.click(); }").await?;
        Ok(())
    }

    async fn scroll_to_bottom(&self) -> DomResult<()> {
        self.call("function() { this.scrollTop = this.scrollHeight; }")
            .await?;
        Ok(())
    }

    async fn is_disabled(&self) -> DomResult<bool> {
        let v = self
            .call(
                "function() { return !!(this.disabled || this.getAttribute('aria-disabled') === 'true'); }",
            )
            .await?;
        Ok(v.and_then(|v| v.as_bool()).unwrap_or(false))
    }
}

// ── Downloads ────────────────────────────────────────────────────────────────

struct CompletedDownload {
    guid: String,
    staged: PathBuf,
    suggested: Option<String>,
    /// Discard epoch current when the download began.
    epoch: u64,
}

async fn remove_staged(download: &CompletedDownload) {
    if let Err(e) = tokio::fs::remove_file(&download.staged).await {
        debug!("browser: orphan {} not removed: {}", download.staged.display(), e);
    }
}

struct ChromeArtifact {
    download: CompletedDownload,
}

#[async_trait]
impl Artifact for ChromeArtifact {
    fn suggested_filename(&self) -> Option<String> {
        self.download.suggested.clone()
    }

    async fn save_to(self: Box<Self>, path: &Path) -> DomResult<()> {
        let staged = &self.download.staged;
        if tokio::fs::rename(staged, path).await.is_ok() {
            return Ok(());
        }
        // Staging and output may sit on different filesystems.
        tokio::fs::copy(staged, path)
            .await
            .map_err(|e| DomError::Artifact(format!("{} → {}: {}", staged.display(), path.display(), e)))?;
        if let Err(e) = tokio::fs::remove_file(staged).await {
            warn!("browser: staged download {} not removed: {}", staged.display(), e);
        }
        Ok(())
    }
}

/// Pump `Browser.downloadWillBegin` / `Browser.downloadProgress` into a
/// queue of finished files.
async fn spawn_download_listener(
    browser: &Browser,
    staging: PathBuf,
    epoch: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<CompletedDownload>,
) -> Result<JoinHandle<()>> {
    let mut begins = browser
        .event_listener::<EventDownloadWillBegin>()
        .await
        .map_err(|e| anyhow!("download listener: {}", e))?;
    let mut progress = browser
        .event_listener::<EventDownloadProgress>()
        .await
        .map_err(|e| anyhow!("download listener: {}", e))?;

    Ok(tokio::spawn(async move {
        let mut started: HashMap<String, (String, u64)> = HashMap::new();
        loop {
            tokio::select! {
                Some(ev) = begins.next() => {
                    debug!("browser: download {} begins ({})", ev.guid, ev.suggested_filename);
                    let at = epoch.load(Ordering::SeqCst);
                    started.insert(ev.guid.clone(), (ev.suggested_filename.clone(), at));
                }
                Some(ev) = progress.next() => match ev.state {
                    DownloadProgressState::Completed => {
                        let (suggested, at) = match started.remove(&ev.guid) {
                            Some((name, at)) => (Some(name), at),
                            None => (None, epoch.load(Ordering::SeqCst)),
                        };
                        let done = CompletedDownload {
                            guid: ev.guid.clone(),
                            staged: staging.join(&ev.guid),
                            suggested,
                            epoch: at,
                        };
                        if tx.send(done).is_err() {
                            break;
                        }
                    }
                    DownloadProgressState::Canceled => {
                        warn!("browser: download {} canceled", ev.guid);
                        started.remove(&ev.guid);
                    }
                    _ => {}
                },
                else => break,
            }
        }
    }))
}

// ── Session ──────────────────────────────────────────────────────────────────

/// One launched browser with one tab.
pub struct ChromeSession {
    browser: Mutex<Option<Browser>>,
    page: Page,
    downloads: Mutex<mpsc::UnboundedReceiver<CompletedDownload>>,
    download_epoch: Arc<AtomicU64>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChromeSession {
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        let exe = settings.resolve_executable().ok_or_else(|| {
            anyhow!("No browser found. Install Chrome or Chromium, or set CHROME_EXECUTABLE.")
        })?;
        let staging = settings.resolve_download_dir();
        std::fs::create_dir_all(&staging)
            .map_err(|e| anyhow!("Cannot create download dir {}: {}", staging.display(), e))?;

        info!("browser: launching {}", exe);
        let config = build_session_config(settings, &exe)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| anyhow!("Failed to launch browser ({}): {}", exe, e))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("CDP handler error: {}", e);
                }
            }
        });

        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::AllowAndName)
            .download_path(staging.to_string_lossy().to_string())
            .events_enabled(true)
            .build()
            .map_err(|e| anyhow!("download behavior: {}", e))?;
        browser
            .execute(behavior)
            .await
            .map_err(|e| anyhow!("Failed to redirect downloads: {}", e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let download_epoch = Arc::new(AtomicU64::new(0));
        let download_task =
            spawn_download_listener(&browser, staging, Arc::clone(&download_epoch), tx).await?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("Failed to open tab: {}", e))?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
            .await
            .map_err(|e| anyhow!("Failed to inject stealth script: {}", e))?;

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            page,
            downloads: Mutex::new(rx),
            download_epoch,
            tasks: vec![handler_task, download_task],
        })
    }

    /// Close the browser. Safe to call twice.
    pub async fn shutdown(&self) {
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            if let Err(e) = browser.close().await {
                warn!("browser: close failed (non-fatal): {}", e);
            }
            let _ = browser.wait().await;
            info!("browser: closed");
        }
        for task in &self.tasks {
            task.abort();
        }
    }

    async fn mouse(&self, kind: DispatchMouseEventType, at: Point, delta_y: Option<f64>) -> DomResult<()> {
        let mut builder = DispatchMouseEventParams::builder()
            .r#type(kind.clone())
            .x(at.x)
            .y(at.y);
        match kind {
            DispatchMouseEventType::MousePressed | DispatchMouseEventType::MouseReleased => {
                builder = builder.button(MouseButton::Left).click_count(1);
            }
            DispatchMouseEventType::MouseWheel => {
                builder = builder.delta_x(0.0).delta_y(delta_y.unwrap_or(0.0));
            }
            _ => {}
        }
        let params = builder.build().map_err(DomError::Input)?;
        self.page
            .execute(params)
            .await
            .map_err(|e| cdp_err("mouse event", e))?;
        Ok(())
    }

    async fn eval_json(&self, expr: &str) -> DomResult<serde_json::Value> {
        self.page
            .evaluate(expr)
            .await
            .map_err(|e| cdp_err("evaluate", e))?
            .into_value::<serde_json::Value>()
            .map_err(|e| DomError::Evaluation(e.to_string()))
    }
}

#[async_trait]
impl BrowsingContext for ChromeSession {
    async fn navigate(&self, url: &str) -> DomResult<()> {
        self.page.goto(url).await.map_err(|e| match e {
            CdpError::Ws(_) | CdpError::ChannelSendError(_) => DomError::SessionClosed,
            other => DomError::Navigation {
                url: url.to_string(),
                reason: other.to_string(),
            },
        })?;
        Ok(())
    }

    async fn reload(&self) -> DomResult<()> {
        self.page.reload().await.map_err(|e| cdp_err("reload", e))?;
        Ok(())
    }

    async fn current_url(&self) -> DomResult<String> {
        let url = self.page.url().await.map_err(|e| cdp_err("url", e))?;
        Ok(url.unwrap_or_default())
    }

    async fn query(&self, selector: &str) -> DomResult<Option<ElementHandle>> {
        Ok(self.query_all(selector).await?.into_iter().next())
    }

    async fn query_all(&self, selector: &str) -> DomResult<Vec<ElementHandle>> {
        let found = self
            .page
            .find_elements(selector)
            .await
            .map_err(|e| match e {
                CdpError::Ws(_) | CdpError::ChannelSendError(_) => DomError::SessionClosed,
                other => DomError::Query {
                    selector: selector.to_string(),
                    reason: other.to_string(),
                },
            })?;
        Ok(found.into_iter().map(ChromeElement::handle).collect())
    }

    async fn body_text(&self) -> DomResult<String> {
        let v = self
            .eval_json("document.body ? document.body.innerText : ''")
            .await?;
        Ok(v.as_str().unwrap_or_default().to_string())
    }

    async fn viewport(&self) -> DomResult<ViewportSize> {
        let v = self
            .eval_json("({ w: window.innerWidth, h: window.innerHeight })")
            .await?;
        Ok(ViewportSize {
            width: v["w"].as_f64().unwrap_or(1440.0),
            height: v["h"].as_f64().unwrap_or(900.0),
        })
    }

    async fn pointer_move(&self, to: Point) -> DomResult<()> {
        self.mouse(DispatchMouseEventType::MouseMoved, to, None).await
    }

    async fn pointer_click(&self, at: Point) -> DomResult<()> {
        self.mouse(DispatchMouseEventType::MousePressed, at, None).await?;
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.mouse(DispatchMouseEventType::MouseReleased, at, None).await
    }

    async fn wheel(&self, at: Point, delta_y: f64) -> DomResult<()> {
        self.mouse(DispatchMouseEventType::MouseWheel, at, Some(delta_y))
            .await
    }

    async fn scroll_window_to_bottom(&self) -> DomResult<()> {
        self.eval_json(
            "(() => { window.scrollTo(0, document.documentElement.scrollHeight); return true; })()",
        )
        .await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> DomResult<()> {
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let params = DispatchKeyEventParams::builder()
                .r#type(kind)
                .key(key)
                .code(key)
                .build()
                .map_err(DomError::Input)?;
            self.page
                .execute(params)
                .await
                .map_err(|e| cdp_err("key event", e))?;
        }
        Ok(())
    }

    async fn discard_pending_artifacts(&self) -> usize {
        self.download_epoch.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.downloads.lock().await;
        let mut dropped = 0;
        while let Ok(download) = rx.try_recv() {
            warn!("browser: discarding unclaimed download {}", download.guid);
            remove_staged(&download).await;
            dropped += 1;
        }
        dropped
    }

    async fn await_artifact(&self, timeout: Duration) -> DomResult<Box<dyn Artifact>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut rx = self.downloads.lock().await;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(download)) => {
                    if download.epoch != self.download_epoch.load(Ordering::SeqCst) {
                        warn!("browser: late download {} arrived after its item gave up", download.guid);
                        remove_staged(&download).await;
                        continue;
                    }
                    return Ok(Box::new(ChromeArtifact { download }));
                }
                Ok(None) => return Err(DomError::SessionClosed),
                Err(_) => return Err(DomError::ArtifactTimeout(timeout)),
            }
        }
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        // Drop cannot await; close the browser on the runtime if one is around.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if let Ok(mut guard) = self.browser.try_lock() {
            if let Some(mut browser) = guard.take() {
                handle.spawn(async move {
                    let _ = browser.close().await;
                });
            }
        }
    }
}

/// Launches one [`ChromeSession`] per run on the configured profile.
pub struct ChromeSessionProvider {
    settings: BrowserSettings,
    current: Mutex<Option<Arc<ChromeSession>>>,
}

impl ChromeSessionProvider {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            current: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SessionProvider for ChromeSessionProvider {
    async fn open(&self) -> Result<Arc<dyn BrowsingContext>> {
        let session = Arc::new(ChromeSession::launch(&self.settings).await?);
        *self.current.lock().await = Some(Arc::clone(&session));
        Ok(session)
    }

    async fn close(&self, ctx: Arc<dyn BrowsingContext>) -> Result<()> {
        drop(ctx);
        if let Some(session) = self.current.lock().await.take() {
            session.shutdown().await;
        }
        Ok(())
    }
}
