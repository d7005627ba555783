//! In-memory list app used by the integration tests.
//!
//! Models a client-rendered file list: lazily rendered rows, a detail pane
//! that follows the selection, a download control per item, a windowed
//! paginator, a scan interstitial that a reload clears, a login redirect
//! that pulls the tab off the list, and an overflow menu holding the
//! download control for some items.
#![allow(dead_code)]

use async_trait::async_trait;
use list_courier::core::config::{EngineSettings, JobConfig, PacingSettings};
use list_courier::dom::{Artifact, BrowsingContext, DomResult, Element, ElementHandle};
use list_courier::{DomError, Point, Region, Viewport};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

pub const LIST_URL: &str = "https://app.example/files/shared";
pub const LOGIN_URL: &str = "https://accounts.example/login";

const CONTAINER: &str = "[data-testid='item-list']";
const ROW: &str = "[data-testid='item-row']";
const NAME: &str = "[data-testid='item-name']";
const TITLE: &str = "[data-testid='item-title']";
const DETAIL: &str = "[data-testid='detail-panel']";
const ACTION: &str = "a[download][href][data-testid='download-button']";
const ACTIVE_PAGE: &str = "nav[aria-label*='pagination' i] [aria-current='page']";
const PAGE_BUTTONS: &str =
    "nav[aria-label*='pagination' i] li > button, nav[aria-label*='pagination' i] li > a";
const WARNING: &str = "[data-testid='scan-warning']";
const MENU_TRIGGER: &str = "[aria-label*='More actions' i], [aria-haspopup='menu']";
const MENU_ITEM: &str =
    "[role='menuitem'][aria-label*='Download' i], [role='menuitem'] a[href*='download']";

pub fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("list_courier=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// What clicking an item's action control does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Download,
    /// The detail pane has no action control.
    Missing,
    /// Show the scan interstitial this many times before downloading.
    Obstruct(u32),
    /// Redirect to the login page this many times before downloading.
    WanderOff(u32),
    /// The download control sits in the "More actions" menu.
    Menu,
    /// A "More actions" menu without a download entry.
    EmptyMenu,
    /// The download finishes this many milliseconds after the click.
    Late(u64),
    /// Clicking starts no download at all.
    Silent,
    /// The download arrives but cannot be written.
    Broken,
}

#[derive(Debug, Clone)]
pub struct FakeItem {
    pub name: String,
    pub action: Action,
    /// Row clicks change the selection.
    pub selectable: bool,
}

impl FakeItem {
    pub fn new(name: &str, action: Action) -> Self {
        Self {
            name: name.to_string(),
            action,
            selectable: true,
        }
    }

    /// Clicks on this row leave the previous selection in place.
    pub fn unselectable(mut self) -> Self {
        self.selectable = false;
        self
    }
}

struct PendingDownload {
    name: String,
    ready_at: Instant,
    epoch: u64,
    broken: bool,
}

pub fn items(names: &[&str]) -> Vec<FakeItem> {
    names.iter().map(|n| FakeItem::new(n, Action::Download)).collect()
}

/// `pages` pages of `per_page` uniquely named items.
pub fn numbered_pages(pages: usize, per_page: usize) -> Vec<Vec<FakeItem>> {
    (1..=pages)
        .map(|p| {
            (1..=per_page)
                .map(|i| FakeItem::new(&format!("Report p{p} r{i}"), Action::Download))
                .collect()
        })
        .collect()
}

pub struct SiteState {
    pages: Vec<Vec<FakeItem>>,
    batch: usize,
    window: u32,
    page: u32,
    rendered: usize,
    selected: Option<usize>,
    obstructed: bool,
    url: String,
    generation: u64,
    pending: Vec<PendingDownload>,
    artifact_epoch: u64,
    menu_open: bool,
    stall_scrolls: u32,
    stall_after_reload: Option<u32>,
    pub downloads: Vec<String>,
    /// Item names whose row received a click, in order.
    pub select_clicks: Vec<String>,
    pub menu_opens: u32,
    /// Downloads thrown away after their item gave up.
    pub orphans: u32,
    pub keys: Vec<String>,
    pub fail_keys: bool,
    pub reloads: u32,
    pub navigations: u32,
    pub pointer_clicks: u32,
    pub synthetic_clicks: u32,
    pub fail_navigation: bool,
}

impl SiteState {
    fn items(&self) -> &[FakeItem] {
        self.pages
            .get(self.page as usize - 1)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn on_list(&self) -> bool {
        self.url == LIST_URL
    }

    fn paginated(&self) -> bool {
        self.pages.len() > 1
    }

    fn reset_view(&mut self) {
        self.generation += 1;
        self.selected = None;
        self.menu_open = false;
        self.obstructed = false;
        self.rendered = self.batch.min(self.items().len());
    }

    fn window(&self) -> Vec<u32> {
        if !self.paginated() {
            return Vec::new();
        }
        let total = self.pages.len() as u32;
        let w = self.window.clamp(1, total);
        let start = self
            .page
            .saturating_sub(w / 2)
            .max(1)
            .min(total - w + 1);
        (start..start + w).collect()
    }

    fn selected_item(&self) -> Option<&FakeItem> {
        self.selected.and_then(|i| self.items().get(i))
    }

    fn action_present(&self) -> bool {
        self.selected_item().is_some_and(|item| {
            !matches!(item.action, Action::Missing | Action::Menu | Action::EmptyMenu)
        })
    }

    fn menu_trigger_present(&self) -> bool {
        self.selected_item()
            .is_some_and(|item| matches!(item.action, Action::Menu | Action::EmptyMenu))
    }

    fn menu_item_present(&self) -> bool {
        self.menu_open
            && self
                .selected_item()
                .is_some_and(|item| item.action == Action::Menu)
    }

    fn alive(&self, node: Node, generation: u64) -> bool {
        if generation != self.generation || !self.on_list() {
            return false;
        }
        match node {
            Node::Container => true,
            Node::Row(i) | Node::Name(i) | Node::Title(i) => i < self.rendered,
            Node::Detail => self.selected.is_some(),
            Node::Action => self.action_present(),
            Node::MenuTrigger => self.menu_trigger_present(),
            Node::MenuItem => self.menu_item_present(),
            Node::ActivePage => self.paginated(),
            Node::PageButton(n) => self.window().contains(&n),
            Node::Warning => self.obstructed,
        }
    }

    fn region(&self, node: Node) -> Option<Region> {
        let row_y = |i: usize| 100.0 + 50.0 * i as f64;
        let button = |n: u32| {
            self.window()
                .iter()
                .position(|p| *p == n)
                .map(|k| Region::new(100.0 + 40.0 * k as f64, 20.0, 32.0, 32.0))
        };
        match node {
            Node::Container => Some(Region::new(0.0, 80.0, 800.0, 800.0)),
            Node::Row(i) => Some(Region::new(0.0, row_y(i), 800.0, 40.0)),
            Node::Name(i) | Node::Title(i) => Some(Region::new(20.0, row_y(i) + 5.0, 300.0, 30.0)),
            Node::Detail => Some(Region::new(950.0, 80.0, 450.0, 700.0)),
            Node::Action => Some(Region::new(1000.0, 120.0, 120.0, 36.0)),
            Node::MenuTrigger => Some(Region::new(1300.0, 120.0, 32.0, 32.0)),
            Node::MenuItem => Some(Region::new(1000.0, 170.0, 160.0, 32.0)),
            Node::ActivePage => button(self.page),
            Node::PageButton(n) => button(n),
            Node::Warning => Some(Region::new(400.0, 300.0, 500.0, 200.0)),
        }
    }

    fn text(&self, node: Node) -> String {
        let name = |i: usize| {
            self.items()
                .get(i)
                .map(|it| it.name.clone())
                .unwrap_or_default()
        };
        match node {
            Node::Container => String::new(),
            Node::Row(i) => format!("{}\nModified today", name(i)),
            Node::Name(i) | Node::Title(i) => name(i),
            Node::Detail => match self.selected {
                Some(i) => format!("{}\nOwner: Dana\nShared with you", name(i)),
                None => String::new(),
            },
            Node::Action | Node::MenuItem => "Download".to_string(),
            Node::MenuTrigger => "More actions".to_string(),
            Node::ActivePage => self.page.to_string(),
            Node::PageButton(n) => n.to_string(),
            Node::Warning => "Virus scan in progress".to_string(),
        }
    }

    fn activate(&mut self, node: Node) {
        match node {
            Node::Row(i) | Node::Name(i) | Node::Title(i) => {
                let Some((name, selectable)) =
                    self.items().get(i).map(|it| (it.name.clone(), it.selectable))
                else {
                    return;
                };
                self.select_clicks.push(name);
                if selectable && self.selected != Some(i) {
                    self.selected = Some(i);
                    self.menu_open = false;
                }
            }
            Node::PageButton(n) if n != self.page => {
                self.page = n;
                self.reset_view();
            }
            Node::Action => self.trigger_action(),
            Node::MenuTrigger => {
                self.menu_open = true;
                self.menu_opens += 1;
            }
            Node::MenuItem => {
                self.menu_open = false;
                self.trigger_action();
            }
            _ => {}
        }
    }

    fn queue_download(&mut self, name: String, delay_ms: u64, broken: bool) {
        self.pending.push(PendingDownload {
            name,
            ready_at: Instant::now() + Duration::from_millis(delay_ms),
            epoch: self.artifact_epoch,
            broken,
        });
    }

    fn trigger_action(&mut self) {
        let Some(i) = self.selected else { return };
        let page = self.page as usize - 1;
        let Some(item) = self.pages.get_mut(page).and_then(|p| p.get_mut(i)) else {
            return;
        };
        let name = item.name.clone();
        let action = item.action;
        match action {
            Action::Download | Action::Menu => self.queue_download(name, 0, false),
            Action::Late(ms) => self.queue_download(name, ms, false),
            Action::Broken => self.queue_download(name, 0, true),
            Action::Missing | Action::Silent | Action::EmptyMenu => {}
            Action::Obstruct(n) if n > 0 => {
                item.action = Action::Obstruct(n - 1);
                self.obstructed = true;
            }
            Action::WanderOff(n) if n > 0 => {
                item.action = Action::WanderOff(n - 1);
                self.url = LOGIN_URL.to_string();
                self.generation += 1;
            }
            Action::Obstruct(_) | Action::WanderOff(_) => self.queue_download(name, 0, false),
        }
    }

    /// Topmost clickable node under `at`.
    fn hit(&self, at: Point) -> Option<Node> {
        if !self.on_list() {
            return None;
        }
        let mut candidates = Vec::new();
        if self.menu_item_present() {
            candidates.push(Node::MenuItem);
        }
        if self.menu_trigger_present() {
            candidates.push(Node::MenuTrigger);
        }
        if self.action_present() {
            candidates.push(Node::Action);
        }
        candidates.extend(self.window().into_iter().map(Node::PageButton));
        candidates.extend((0..self.rendered).map(Node::Title));
        candidates.extend((0..self.rendered).map(Node::Row));
        candidates
            .into_iter()
            .find(|n| self.region(*n).is_some_and(|r| r.contains(&at)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Container,
    Row(usize),
    Name(usize),
    Title(usize),
    Detail,
    Action,
    MenuTrigger,
    MenuItem,
    ActivePage,
    PageButton(u32),
    Warning,
}

pub struct FakeSite {
    me: Weak<FakeSite>,
    state: Mutex<SiteState>,
}

impl FakeSite {
    /// Everything rendered up front, paginator window of five.
    pub fn new(pages: Vec<Vec<FakeItem>>) -> Arc<Self> {
        Self::with_options(pages, usize::MAX, 5)
    }

    /// `batch` rows become visible per lazy-load scroll.
    pub fn with_options(pages: Vec<Vec<FakeItem>>, batch: usize, window: u32) -> Arc<Self> {
        let mut state = SiteState {
            pages,
            batch,
            window,
            page: 1,
            rendered: 0,
            selected: None,
            obstructed: false,
            url: LIST_URL.to_string(),
            generation: 0,
            pending: Vec::new(),
            artifact_epoch: 0,
            menu_open: false,
            stall_scrolls: 0,
            stall_after_reload: None,
            downloads: Vec::new(),
            select_clicks: Vec::new(),
            menu_opens: 0,
            orphans: 0,
            keys: Vec::new(),
            fail_keys: false,
            reloads: 0,
            navigations: 0,
            pointer_clicks: 0,
            synthetic_clicks: 0,
            fail_navigation: false,
        };
        state.reset_view();
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            state: Mutex::new(state),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, SiteState> {
        self.state.lock().unwrap()
    }

    pub fn downloads(&self) -> Vec<String> {
        self.state().downloads.clone()
    }

    pub fn reloads(&self) -> u32 {
        self.state().reloads
    }

    pub fn page(&self) -> u32 {
        self.state().page
    }

    pub fn set_fail_navigation(&self, fail: bool) {
        self.state().fail_navigation = fail;
    }

    /// After the next reload, this many lazy-load scrolls render nothing.
    pub fn stall_after_reload(&self, scrolls: u32) {
        self.state().stall_after_reload = Some(scrolls);
    }

    /// How many clicks the row of `name` received.
    pub fn select_clicks(&self, name: &str) -> usize {
        self.state().select_clicks.iter().filter(|n| *n == name).count()
    }

    fn handle(&self, node: Node, generation: u64) -> ElementHandle {
        Arc::new(FakeElement {
            site: self.me.upgrade().expect("site alive"),
            node,
            generation,
        })
    }

    fn select(&self, selector: &str) -> Vec<ElementHandle> {
        let st = self.state();
        if !st.on_list() {
            return Vec::new();
        }
        let nodes: Vec<Node> = match selector {
            CONTAINER => vec![Node::Container],
            ROW => (0..st.rendered).map(Node::Row).collect(),
            DETAIL if st.selected.is_some() => vec![Node::Detail],
            ACTIVE_PAGE if st.paginated() => vec![Node::ActivePage],
            PAGE_BUTTONS => st.window().into_iter().map(Node::PageButton).collect(),
            WARNING if st.obstructed => vec![Node::Warning],
            MENU_ITEM if st.menu_item_present() => vec![Node::MenuItem],
            _ => Vec::new(),
        };
        let generation = st.generation;
        drop(st);
        nodes.into_iter().map(|n| self.handle(n, generation)).collect()
    }
}

struct FakeElement {
    site: Arc<FakeSite>,
    node: Node,
    generation: u64,
}

impl FakeElement {
    fn live(&self) -> DomResult<MutexGuard<'_, SiteState>> {
        let st = self.site.state();
        if st.alive(self.node, self.generation) {
            Ok(st)
        } else {
            Err(DomError::Detached)
        }
    }
}

#[async_trait]
impl Element for FakeElement {
    async fn query(&self, selector: &str) -> DomResult<Option<ElementHandle>> {
        Ok(self.query_all(selector).await?.into_iter().next())
    }

    async fn query_all(&self, selector: &str) -> DomResult<Vec<ElementHandle>> {
        let st = self.live()?;
        let child = match (self.node, selector) {
            (Node::Row(i), NAME) => Some(Node::Name(i)),
            (Node::Row(i), TITLE) => Some(Node::Title(i)),
            (Node::Detail, ACTION) if st.action_present() => Some(Node::Action),
            (Node::Detail, MENU_TRIGGER) if st.menu_trigger_present() => Some(Node::MenuTrigger),
            _ => None,
        };
        let generation = st.generation;
        drop(st);
        Ok(child
            .map(|n| self.site.handle(n, generation))
            .into_iter()
            .collect())
    }

    async fn text(&self) -> DomResult<String> {
        Ok(self.live()?.text(self.node))
    }

    async fn attribute(&self, name: &str) -> DomResult<Option<String>> {
        let _st = self.live()?;
        Ok(match (self.node, name) {
            (Node::Action, "href") => Some("/download".to_string()),
            _ => None,
        })
    }

    async fn bounding_region(&self) -> DomResult<Option<Region>> {
        Ok(self.live()?.region(self.node))
    }

    async fn scroll_into_view(&self) -> DomResult<()> {
        self.live().map(|_| ())
    }

    async fn click(&self) -> DomResult<()> {
        let mut st = self.live()?;
        st.synthetic_clicks += 1;
        st.activate(self.node);
        Ok(())
    }

    async fn scroll_to_bottom(&self) -> DomResult<()> {
        let mut st = self.live()?;
        if self.node == Node::Container {
            if st.stall_scrolls > 0 {
                st.stall_scrolls -= 1;
                return Ok(());
            }
            let total = st.items().len();
            st.rendered = st.rendered.saturating_add(st.batch).min(total);
        }
        Ok(())
    }

    async fn is_disabled(&self) -> DomResult<bool> {
        self.live().map(|_| false)
    }
}

struct FakeArtifact {
    site: Arc<FakeSite>,
    name: String,
    broken: bool,
}

#[async_trait]
impl Artifact for FakeArtifact {
    fn suggested_filename(&self) -> Option<String> {
        Some(format!("{}.pdf", self.name))
    }

    async fn save_to(self: Box<Self>, path: &Path) -> DomResult<()> {
        if self.broken {
            return Err(DomError::Artifact("staged file vanished".to_string()));
        }
        tokio::fs::write(path, format!("%PDF-1.4 {}", self.name))
            .await
            .map_err(|e| DomError::Artifact(e.to_string()))?;
        self.site.state().downloads.push(self.name.clone());
        Ok(())
    }
}

#[async_trait]
impl BrowsingContext for FakeSite {
    async fn navigate(&self, url: &str) -> DomResult<()> {
        let mut st = self.state();
        st.navigations += 1;
        if st.fail_navigation {
            return Err(DomError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_RESET".to_string(),
            });
        }
        st.url = url.to_string();
        st.page = 1;
        st.reset_view();
        Ok(())
    }

    async fn reload(&self) -> DomResult<()> {
        let mut st = self.state();
        st.reloads += 1;
        st.page = 1;
        if let Some(scrolls) = st.stall_after_reload.take() {
            st.stall_scrolls = scrolls;
        }
        st.reset_view();
        Ok(())
    }

    async fn current_url(&self) -> DomResult<String> {
        Ok(self.state().url.clone())
    }

    async fn query(&self, selector: &str) -> DomResult<Option<ElementHandle>> {
        Ok(self.select(selector).into_iter().next())
    }

    async fn query_all(&self, selector: &str) -> DomResult<Vec<ElementHandle>> {
        Ok(self.select(selector))
    }

    async fn body_text(&self) -> DomResult<String> {
        let st = self.state();
        Ok(if st.obstructed {
            "Shared files\nVirus scan in progress. Try again later.".to_string()
        } else {
            "Shared files".to_string()
        })
    }

    async fn viewport(&self) -> DomResult<Viewport> {
        Ok(Viewport {
            width: 1440.0,
            height: 900.0,
        })
    }

    async fn pointer_move(&self, _to: Point) -> DomResult<()> {
        Ok(())
    }

    async fn pointer_click(&self, at: Point) -> DomResult<()> {
        let mut st = self.state();
        st.pointer_clicks += 1;
        if let Some(node) = st.hit(at) {
            st.activate(node);
        }
        Ok(())
    }

    async fn wheel(&self, _at: Point, _delta_y: f64) -> DomResult<()> {
        Ok(())
    }

    async fn scroll_window_to_bottom(&self) -> DomResult<()> {
        Ok(())
    }

    async fn press_key(&self, key: &str) -> DomResult<()> {
        let mut st = self.state();
        st.keys.push(key.to_string());
        if st.fail_keys {
            return Err(DomError::Input(format!("{key}: no keyboard")));
        }
        if key == "Escape" {
            st.menu_open = false;
        }
        Ok(())
    }

    async fn discard_pending_artifacts(&self) -> usize {
        let mut st = self.state();
        st.artifact_epoch += 1;
        let now = Instant::now();
        let before = st.pending.len();
        st.pending.retain(|d| d.ready_at > now);
        let dropped = before - st.pending.len();
        st.orphans += dropped as u32;
        dropped
    }

    async fn await_artifact(&self, timeout: Duration) -> DomResult<Box<dyn Artifact>> {
        let start = Instant::now();
        loop {
            let next = {
                let mut st = self.state();
                let now = Instant::now();
                let mut found = None;
                while let Some(i) = st.pending.iter().position(|d| d.ready_at <= now) {
                    let download = st.pending.remove(i);
                    if download.epoch == st.artifact_epoch {
                        found = Some(download);
                        break;
                    }
                    st.orphans += 1;
                }
                found
            };
            if let Some(download) = next {
                return Ok(Box::new(FakeArtifact {
                    site: self.me.upgrade().expect("site alive"),
                    name: download.name,
                    broken: download.broken,
                }));
            }
            if start.elapsed() >= timeout {
                return Err(DomError::ArtifactTimeout(timeout));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub fn fast_pacing() -> PacingSettings {
    PacingSettings {
        min_steps: 1,
        max_steps: 3,
        step_delay_min_ms: 0,
        step_delay_max_ms: 0,
        micro_pause_probability: 0.0,
        micro_pause_min_ms: 0,
        micro_pause_max_ms: 0,
        min_deviation_px: 10.0,
    }
}

pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        select_attempts: 3,
        detail_attach_timeout_ms: 150,
        detail_match_timeout_ms: 150,
        poll_interval_ms: 5,
        settle_ms: 0,
        obstruction_retries: 3,
        item_retries: 3,
        retry_backoff_ms: 0,
        artifact_timeout_ms: 300,
        list_attach_timeout_ms: 300,
        lazy_load_settle_ms: 20,
        stagnation_limit: 3,
        max_scroll_attempts: 10,
        advance_timeout_ms: 300,
        seek_timeout_ms: 300,
        seek_max_iterations: 50,
        checkpoint_every: 1,
        idle_probability: 0.0,
        pacing: fast_pacing(),
        ..EngineSettings::default()
    }
}

pub fn fast_job(output_dir: &Path) -> JobConfig {
    JobConfig {
        min_wait_secs: 0.0,
        max_wait_secs: 0.0,
        ..JobConfig::new(LIST_URL, output_dir)
    }
}
