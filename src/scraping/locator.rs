//! Logical role → concrete element resolution.
//!
//! The target app ships several DOM variants for the same widget, so every
//! role maps to an ordered chain of strategies. The first strategy that
//! resolves wins; later ones are broader fallbacks.

use crate::core::error::{ConfigError, DomError};
use crate::scraping::dom::{wait_until, BrowsingContext, ElementHandle};
use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    ListContainer,
    ListItem,
    /// Precise clickable sub-target inside a row.
    ItemTarget,
    DetailView,
    ActionControl,
    ActivePage,
    PageButton,
    NextPage,
    Obstruction,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::ListContainer => "list container",
            Role::ListItem => "list item",
            Role::ItemTarget => "item target",
            Role::DetailView => "detail view",
            Role::ActionControl => "action control",
            Role::ActivePage => "active page indicator",
            Role::PageButton => "page button",
            Role::NextPage => "next page control",
            Role::Obstruction => "obstruction",
        }
    }
}

/// One way of finding an element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Strategy {
    /// CSS selector, resolved against the scope (or the document).
    Selector(String),
    /// Open an overflow menu via `trigger` (in scope), then search the
    /// document for `item` (menus are usually portalled to the body).
    Menu { trigger: String, item: String },
}

impl Strategy {
    fn css(s: &str) -> Self {
        Strategy::Selector(s.to_string())
    }
}

/// One step of the identity-extraction chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentityStrategy {
    /// Descendant to read; `None` reads the row itself.
    #[serde(default)]
    pub selector: Option<String>,
    /// Read this attribute instead of the rendered text.
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub first_line_only: bool,
    /// Trailing decorations removed before validation (case-insensitive).
    #[serde(default)]
    pub strip_suffixes: Vec<String>,
}

impl IdentityStrategy {
    fn text(selector: &str) -> Self {
        Self {
            selector: Some(selector.to_string()),
            attribute: None,
            first_line_only: false,
            strip_suffixes: Vec::new(),
        }
    }
}

/// All selectors of the one target application.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorProfile {
    pub list_container: Vec<Strategy>,
    pub list_item: Vec<Strategy>,
    pub item_target: Vec<Strategy>,
    pub detail_view: Vec<Strategy>,
    pub action_control: Vec<Strategy>,
    pub active_page: Vec<Strategy>,
    pub page_button: Vec<Strategy>,
    pub next_page: Vec<Strategy>,
    pub obstruction: Vec<Strategy>,
    /// Body-text phrases that identify the delayed-scan interstitial.
    pub obstruction_markers: Vec<String>,
    pub identity: Vec<IdentityStrategy>,
    /// Placeholder / anonymized labels never accepted as identities.
    pub identity_denylist: Vec<String>,
    pub identity_deny_patterns: Vec<String>,
    pub menu_timeout_ms: u64,
}

impl Default for SelectorProfile {
    fn default() -> Self {
        Self {
            list_container: vec![
                Strategy::css("[data-testid='item-list']"),
                Strategy::css("[role='list']"),
                Strategy::css("main ul"),
            ],
            list_item: vec![
                Strategy::css("[data-testid='item-row']"),
                Strategy::css("[role='listitem']"),
                Strategy::css("main ul > li"),
            ],
            item_target: vec![
                Strategy::css("[data-testid='item-title']"),
                Strategy::css("[role='button']"),
                Strategy::css("a"),
            ],
            detail_view: vec![
                Strategy::css("[data-testid='detail-panel']"),
                Strategy::css("[role='complementary']"),
                Strategy::css("aside"),
            ],
            action_control: vec![
                Strategy::css("a[download][href][data-testid='download-button']"),
                Strategy::css("a[href*='download'], [aria-label*='Download' i]"),
                Strategy::Menu {
                    trigger: "[aria-label*='More actions' i], [aria-haspopup='menu']".to_string(),
                    item: "[role='menuitem'][aria-label*='Download' i], [role='menuitem'] a[href*='download']"
                        .to_string(),
                },
            ],
            active_page: vec![
                Strategy::css("nav[aria-label*='pagination' i] [aria-current='page']"),
                Strategy::css(".pagination .active"),
            ],
            page_button: vec![
                Strategy::css("nav[aria-label*='pagination' i] li > button, nav[aria-label*='pagination' i] li > a"),
                Strategy::css(".pagination li > *"),
            ],
            next_page: vec![
                Strategy::css("nav[aria-label*='pagination' i] [aria-label*='next' i]"),
                Strategy::css("[rel='next']"),
            ],
            obstruction: vec![
                Strategy::css("[data-testid='scan-warning']"),
                Strategy::css("#uc-download-link"),
            ],
            obstruction_markers: vec![
                "can't scan this file for viruses".to_string(),
                "virus scan in progress".to_string(),
                "file is being scanned".to_string(),
            ],
            identity: vec![
                IdentityStrategy::text("[data-testid='item-name']"),
                IdentityStrategy {
                    first_line_only: true,
                    ..IdentityStrategy::text("[class*='title']")
                },
                IdentityStrategy::text("a"),
                IdentityStrategy {
                    attribute: Some("alt".to_string()),
                    strip_suffixes: vec![
                        " thumbnail".to_string(),
                        " preview".to_string(),
                        " cover".to_string(),
                    ],
                    ..IdentityStrategy::text("img[alt]")
                },
            ],
            identity_denylist: [
                "unknown", "untitled", "anonymous", "loading", "loading…", "n/a", "deleted",
                "private",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            identity_deny_patterns: vec![
                r"^user\s*\d+$".to_string(),
                r"^item\s*#?\d+$".to_string(),
                r"^[\s•*·_\-]+$".to_string(),
            ],
            menu_timeout_ms: 1_500,
        }
    }
}

impl SelectorProfile {
    pub fn strategies(&self, role: Role) -> &[Strategy] {
        match role {
            Role::ListContainer => &self.list_container,
            Role::ListItem => &self.list_item,
            Role::ItemTarget => &self.item_target,
            Role::DetailView => &self.detail_view,
            Role::ActionControl => &self.action_control,
            Role::ActivePage => &self.active_page,
            Role::PageButton => &self.page_button,
            Role::NextPage => &self.next_page,
            Role::Obstruction => &self.obstruction,
        }
    }
}

/// Collapse runs of whitespace and trim.
pub fn clean_label(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct ElementLocator {
    ctx: Arc<dyn BrowsingContext>,
    profile: SelectorProfile,
    deny_patterns: Vec<Regex>,
    markers: Option<AhoCorasick>,
    poll: Duration,
}

impl ElementLocator {
    pub fn new(ctx: Arc<dyn BrowsingContext>, profile: SelectorProfile) -> Result<Self, ConfigError> {
        let deny_patterns = profile
            .identity_deny_patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){p}"))
                    .map_err(|e| ConfigError::Profile(format!("deny pattern `{p}`: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let markers = if profile.obstruction_markers.is_empty() {
            None
        } else {
            Some(
                AhoCorasickBuilder::new()
                    .ascii_case_insensitive(true)
                    .build(&profile.obstruction_markers)
                    .map_err(|e| ConfigError::Profile(format!("obstruction markers: {e}")))?,
            )
        };
        Ok(Self {
            ctx,
            profile,
            deny_patterns,
            markers,
            poll: Duration::from_millis(100),
        })
    }

    pub fn context(&self) -> &Arc<dyn BrowsingContext> {
        &self.ctx
    }

    pub fn profile(&self) -> &SelectorProfile {
        &self.profile
    }

    /// Resolve `role` against the whole document.
    pub async fn locate(&self, role: Role) -> Result<Option<ElementHandle>, DomError> {
        self.resolve(None, role).await
    }

    /// Resolve `role` inside `scope`. Menu strategies open their trigger in
    /// scope but search the document for the item.
    pub async fn locate_within(
        &self,
        scope: &ElementHandle,
        role: Role,
    ) -> Result<Option<ElementHandle>, DomError> {
        self.resolve(Some(scope), role).await
    }

    /// All matches of the first selector strategy that matches anything.
    pub async fn locate_all(&self, role: Role) -> Result<Vec<ElementHandle>, DomError> {
        for strategy in self.profile.strategies(role) {
            if let Strategy::Selector(sel) = strategy {
                let found = self.ctx.query_all(sel).await?;
                if !found.is_empty() {
                    return Ok(found);
                }
            }
        }
        Ok(Vec::new())
    }

    /// Bounded wait for `role` to attach to the document.
    pub async fn wait_for(&self, role: Role, timeout: Duration) -> Option<ElementHandle> {
        wait_until(timeout, self.poll, || self.locate(role)).await
    }

    async fn resolve(
        &self,
        scope: Option<&ElementHandle>,
        role: Role,
    ) -> Result<Option<ElementHandle>, DomError> {
        for (i, strategy) in self.profile.strategies(role).iter().enumerate() {
            let hit = match strategy {
                Strategy::Selector(sel) => match scope {
                    Some(s) => s.query(sel).await?,
                    None => self.ctx.query(sel).await?,
                },
                Strategy::Menu { trigger, item } => self.open_menu(scope, trigger, item).await?,
            };
            if hit.is_some() {
                debug!("locator: {} resolved by strategy #{}", role.name(), i + 1);
                return Ok(hit);
            }
        }
        Ok(None)
    }

    async fn open_menu(
        &self,
        scope: Option<&ElementHandle>,
        trigger: &str,
        item: &str,
    ) -> Result<Option<ElementHandle>, DomError> {
        let opener = match scope {
            Some(s) => s.query(trigger).await?,
            None => self.ctx.query(trigger).await?,
        };
        let Some(opener) = opener else {
            return Ok(None);
        };
        opener.click().await?;
        let timeout = Duration::from_millis(self.profile.menu_timeout_ms);
        let found = wait_until(timeout, self.poll, || self.ctx.query(item)).await;
        if found.is_none() {
            // Leave the page as we found it.
            if let Err(e) = self.ctx.press_key("Escape").await {
                debug!("locator: closing the menu failed: {}", e);
            }
        }
        Ok(found)
    }

    /// First label from the identity chain that passes [`Self::is_valid_identity`];
    /// empty when none does. Read-only.
    pub async fn extract_identity(&self, item: &ElementHandle) -> String {
        for strategy in &self.profile.identity {
            let node = match &strategy.selector {
                Some(sel) => match item.query(sel).await {
                    Ok(Some(n)) => n,
                    _ => continue,
                },
                None => Arc::clone(item),
            };
            let raw = match &strategy.attribute {
                Some(attr) => node.attribute(attr).await.ok().flatten(),
                None => node.text().await.ok(),
            };
            let Some(raw) = raw else { continue };
            let label = shape_label(&raw, strategy);
            if self.is_valid_identity(&label) {
                return label;
            }
        }
        String::new()
    }

    /// Non-empty, at least two characters, and not a placeholder.
    pub fn is_valid_identity(&self, label: &str) -> bool {
        let label = label.trim();
        if label.chars().count() < 2 {
            return false;
        }
        let lower = label.to_lowercase();
        if self
            .profile
            .identity_denylist
            .iter()
            .any(|d| d.to_lowercase() == lower)
        {
            return false;
        }
        !self.deny_patterns.iter().any(|re| re.is_match(label))
    }

    /// True when the delayed-scan interstitial is showing.
    pub async fn is_obstructed(&self) -> bool {
        if matches!(self.locate(Role::Obstruction).await, Ok(Some(_))) {
            return true;
        }
        let Some(markers) = &self.markers else {
            return false;
        };
        match self.ctx.body_text().await {
            Ok(text) => markers.is_match(&text),
            Err(_) => false,
        }
    }
}

fn shape_label(raw: &str, strategy: &IdentityStrategy) -> String {
    let raw = if strategy.first_line_only {
        raw.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
    } else {
        raw
    };
    let mut label = clean_label(raw);
    for suffix in &strategy.strip_suffixes {
        if let Some(cut) = suffix_start(&label, suffix) {
            label.truncate(cut);
            label = label.trim_end().to_string();
            break;
        }
    }
    label
}

/// Byte offset in `label` where a case-insensitive `suffix` begins.
/// Compares whole chars, since case folding can change byte lengths.
fn suffix_start(label: &str, suffix: &str) -> Option<usize> {
    let n = suffix.chars().count();
    if n == 0 {
        return None;
    }
    let (start, _) = label.char_indices().rev().nth(n - 1)?;
    (label[start..].to_lowercase() == suffix.to_lowercase()).then_some(start)
}
