//! Humanized pointer trajectories and pacing.
//!
//! Pointer moves follow a cubic Bézier curve from the last synthesized
//! position to a random point inside the target's central 60%. Both control
//! points sit on the straight path (at ⅓ and ⅔) pushed sideways by a random
//! deviation proportional to the travel distance. The curve is sampled with
//! smoothstep easing so the pointer accelerates and decelerates, and the
//! occasional step carries a micro-pause.
//!
//! The last position lives on the synthesizer instance, so independent
//! sessions never share trajectory state.

use crate::core::config::PacingSettings;
use crate::core::error::DomError;
use crate::core::types::{Point, Region, Viewport};
use crate::scraping::dom::{BrowsingContext, ElementHandle};
use rand::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Fraction of the target box a click may land in.
const TARGET_CORE: f64 = 0.6;

/// One emitted pointer-move event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathStep {
    pub point: Point,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub struct PointerPath {
    pub start: Point,
    pub target: Point,
    pub steps: Vec<PathStep>,
}

/// `t² (3 − 2t)`.
pub fn smoothstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

pub fn cubic_bezier(p0: Point, p1: Point, p2: Point, p3: Point, t: f64) -> Point {
    let u = 1.0 - t;
    let (uu, tt) = (u * u, t * t);
    let (a, b, c, d) = (uu * u, 3.0 * uu * t, 3.0 * u * tt, tt * t);
    Point::new(
        a * p0.x + b * p1.x + c * p2.x + d * p3.x,
        a * p0.y + b * p1.y + c * p2.y + d * p3.y,
    )
}

/// One synthesizer per browsing session, shared by the engine and navigator.
pub type SharedInput = Arc<Mutex<HumanizedInputSynthesizer>>;

pub struct HumanizedInputSynthesizer {
    rng: StdRng,
    last_position: Option<Point>,
    pacing: PacingSettings,
}

impl HumanizedInputSynthesizer {
    pub fn new(pacing: PacingSettings) -> Self {
        Self::with_seed(pacing, rand::random())
    }

    /// Deterministic trajectories, for tests and replays.
    pub fn with_seed(pacing: PacingSettings, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            last_position: None,
            pacing,
        }
    }

    pub fn last_position(&self) -> Option<Point> {
        self.last_position
    }

    /// Random point inside the central 60% of `region`.
    pub fn target_point(&mut self, region: &Region) -> Point {
        let core = region.shrink_to(TARGET_CORE);
        Point::new(
            core.x + self.unit() * core.width,
            core.y + self.unit() * core.height,
        )
    }

    /// Plan a trajectory from the last position (or a random on-screen point)
    /// into `target`. Does not touch the browser.
    pub fn plan_path(&mut self, viewport: Viewport, target: &Region) -> PointerPath {
        let start = match self.last_position {
            Some(p) => viewport.clamp(p),
            None => Point::new(
                self.unit() * viewport.width,
                self.unit() * viewport.height,
            ),
        };
        let end = self.target_point(target);

        let dx = end.x - start.x;
        let dy = end.y - start.y;
        let distance = start.distance(&end);
        let (nx, ny) = if distance > f64::EPSILON {
            (-dy / distance, dx / distance)
        } else {
            (0.0, 1.0)
        };

        let spread = (distance * self.range_f64(0.1, 0.3)).max(self.pacing.min_deviation_px);
        let dev1 = spread * self.range_f64(0.5, 1.0) * self.sign();
        let dev2 = spread * self.range_f64(0.5, 1.0) * self.sign();
        let c1 = Point::new(
            start.x + dx / 3.0 + nx * dev1,
            start.y + dy / 3.0 + ny * dev1,
        );
        let c2 = Point::new(
            start.x + 2.0 * dx / 3.0 + nx * dev2,
            start.y + 2.0 * dy / 3.0 + ny * dev2,
        );

        let count = self.range_u64(self.pacing.min_steps as u64, self.pacing.max_steps as u64).max(1);
        let mut steps = Vec::with_capacity(count as usize);
        for i in 1..=count {
            let t = smoothstep(i as f64 / count as f64);
            let point = if i == count {
                end
            } else {
                viewport.clamp(cubic_bezier(start, c1, c2, end, t))
            };
            let mut delay_ms =
                self.range_u64(self.pacing.step_delay_min_ms, self.pacing.step_delay_max_ms);
            if self.chance(self.pacing.micro_pause_probability) {
                delay_ms +=
                    self.range_u64(self.pacing.micro_pause_min_ms, self.pacing.micro_pause_max_ms);
            }
            steps.push(PathStep {
                point,
                delay: Duration::from_millis(delay_ms),
            });
        }

        PointerPath {
            start,
            target: end,
            steps,
        }
    }

    /// Drive the pointer along a fresh path into `target`. Returns the landing point.
    pub async fn move_to(
        &mut self,
        ctx: &dyn BrowsingContext,
        target: &Region,
    ) -> Result<Point, DomError> {
        let viewport = ctx.viewport().await?;
        let path = self.plan_path(viewport, target);
        debug!(
            "humanize: {} steps ({:.0},{:.0}) → ({:.0},{:.0})",
            path.steps.len(),
            path.start.x,
            path.start.y,
            path.target.x,
            path.target.y
        );
        for step in &path.steps {
            ctx.pointer_move(step.point).await?;
            self.last_position = Some(step.point);
            if !step.delay.is_zero() {
                tokio::time::sleep(step.delay).await;
            }
        }
        Ok(path.target)
    }

    /// Humanized move followed by a click at the landing point.
    pub async fn click_region(
        &mut self,
        ctx: &dyn BrowsingContext,
        target: &Region,
    ) -> Result<Point, DomError> {
        let at = self.move_to(ctx, target).await?;
        self.micro_pause().await;
        ctx.pointer_click(at).await?;
        Ok(at)
    }

    /// Scroll `el` into view and click it like a person would. Elements
    /// without a layout box get a synthetic click instead.
    pub async fn click_element(
        &mut self,
        ctx: &dyn BrowsingContext,
        el: &ElementHandle,
    ) -> Result<(), DomError> {
        el.scroll_into_view().await?;
        match el.bounding_region().await? {
            Some(region) if !region.is_empty() => {
                self.click_region(ctx, &region).await?;
            }
            _ => el.click().await?,
        }
        Ok(())
    }

    pub fn shared(self) -> SharedInput {
        Arc::new(Mutex::new(self))
    }

    /// Short pointer drift plus a small scroll, to break up mechanical rhythm.
    pub async fn idle_drift(&mut self, ctx: &dyn BrowsingContext) -> Result<(), DomError> {
        let viewport = ctx.viewport().await?;
        let anchor = self.last_position.unwrap_or(Point::new(
            viewport.width / 2.0,
            viewport.height / 2.0,
        ));
        let w = self.range_f64(60.0, 240.0);
        let h = self.range_f64(40.0, 160.0);
        let target = Region::new(anchor.x - w / 2.0, anchor.y - h / 2.0, w, h);
        let landed = self.move_to(ctx, &target).await?;
        let delta = self.range_f64(-180.0, 260.0);
        ctx.wheel(landed, delta).await?;
        self.micro_pause().await;
        Ok(())
    }

    /// Uniformly random duration in `[min, max]`, millisecond resolution.
    pub fn pick_duration(&mut self, min: Duration, max: Duration) -> Duration {
        Duration::from_millis(self.range_u64(min.as_millis() as u64, max.as_millis() as u64))
    }

    /// Sleep within the configured micro-pause range.
    pub async fn micro_pause(&mut self) {
        let ms = self.range_u64(self.pacing.micro_pause_min_ms, self.pacing.micro_pause_max_ms);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    pub fn chance(&mut self, probability: f64) -> bool {
        if probability <= 0.0 {
            return false;
        }
        self.rng.random_bool(probability.min(1.0))
    }

    fn unit(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    fn sign(&mut self) -> f64 {
        if self.rng.random_bool(0.5) {
            1.0
        } else {
            -1.0
        }
    }

    fn range_f64(&mut self, lo: f64, hi: f64) -> f64 {
        if hi <= lo {
            return lo;
        }
        self.rng.random_range(lo..hi)
    }

    fn range_u64(&mut self, lo: u64, hi: u64) -> u64 {
        if hi <= lo {
            return lo;
        }
        self.rng.random_range(lo..=hi)
    }
}
