use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// One permanently-failed item. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub name: String,
    pub reason: String,
    pub page_number: u32,
}

impl FailureRecord {
    pub fn new(name: impl Into<String>, reason: impl Into<String>, page_number: u32) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
            page_number,
        }
    }
}

/// Durable run state of one job. Only the checkpoint store writes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Checkpoint {
    pub processed_item_keys: BTreeSet<String>,
    pub success_count: u64,
    pub failed_items: Vec<FailureRecord>,
    pub current_page: u32,
    pub output_location: String,
    pub source_list_url: String,
    pub item_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(source_list_url: &str, output_location: &str, item_label: &str) -> Self {
        Self {
            current_page: 1,
            source_list_url: source_list_url.to_string(),
            output_location: output_location.to_string(),
            item_label: item_label.to_string(),
            ..Default::default()
        }
    }

    pub fn is_processed(&self, key: &str) -> bool {
        self.processed_item_keys.contains(key)
    }
}

/// Partial update merged into the stored checkpoint.
///
/// Keys are unioned, the success count only moves up, failures are appended
/// when not already present, and scalar fields overwrite when set.
#[derive(Debug, Clone, Default)]
pub struct CheckpointPatch {
    pub processed_item_keys: Vec<String>,
    pub success_count: Option<u64>,
    pub failed_items: Vec<FailureRecord>,
    pub current_page: Option<u32>,
    pub output_location: Option<String>,
    pub source_list_url: Option<String>,
    pub item_label: Option<String>,
}

impl From<&Checkpoint> for CheckpointPatch {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            processed_item_keys: cp.processed_item_keys.iter().cloned().collect(),
            success_count: Some(cp.success_count),
            failed_items: cp.failed_items.clone(),
            current_page: Some(cp.current_page),
            output_location: Some(cp.output_location.clone()),
            source_list_url: Some(cp.source_list_url.clone()),
            item_label: Some(cp.item_label.clone()),
        }
    }
}

/// In-memory traversal position. The item index is never persisted: a
/// restarted page is walked again from row 0 and deduplicated by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub page_index: u32,
    pub item_index_on_page: usize,
}

impl Cursor {
    pub fn at_page(page_index: u32) -> Self {
        Self {
            page_index,
            item_index_on_page: 0,
        }
    }

    pub fn advance(&mut self) {
        self.item_index_on_page += 1;
    }
}

/// Terminal result of one dequeued row.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Succeeded { identity: String, path: PathBuf },
    Skipped { identity: String },
    Failed(FailureRecord),
    /// Unclassified error: logged, key marked processed, no failure record.
    Abandoned { identity: String, reason: String },
}

/// Tagged result of a single workflow step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome<T> {
    Success(T),
    Retryable(String),
    Permanent(String),
}

/// Final itemised report of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    pub failures: Vec<FailureRecord>,
    pub reload_recoveries: u32,
    pub context_recoveries: u32,
    pub pages_visited: u32,
    pub last_page: u32,
    pub stopped: bool,
    pub limit_reached: bool,
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "succeeded: {}  failed: {}  skipped: {}  pages: {} (last {})",
            self.success, self.failed, self.skipped, self.pages_visited, self.last_page
        )?;
        if self.reload_recoveries + self.context_recoveries > 0 {
            writeln!(
                f,
                "recoveries: {} reload, {} context",
                self.reload_recoveries, self.context_recoveries
            )?;
        }
        if self.stopped {
            writeln!(f, "run was stopped before the list was exhausted")?;
        }
        for failure in &self.failures {
            writeln!(
                f,
                "  - {} (page {}): {}",
                failure.name, failure.page_number, failure.reason
            )?;
        }
        Ok(())
    }
}

// ── Geometry ────────────────────────────────────────────────────────────────

/// A point in CSS pixels, relative to the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Bounding box of an element, in viewport CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Region {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The middle `fraction` of the box on both axes.
    pub fn shrink_to(&self, fraction: f64) -> Region {
        let w = self.width * fraction;
        let h = self.height * fraction;
        Region::new(
            self.x + (self.width - w) / 2.0,
            self.y + (self.height - h) / 2.0,
            w,
            h,
        )
    }

    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn clamp(&self, p: Point) -> Point {
        Point::new(p.x.clamp(0.0, self.width), p.y.clamp(0.0, self.height))
    }
}
