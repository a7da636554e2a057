//! Periodic frame generator.
//!
//! The first entity resolved after the tick resolver registers starts a
//! background task that submits a tick frame roughly every `interval`,
//! never sleeping less than `floor` between frames. The task holds only a
//! weak engine handle and stops once the engine is dropped.

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use orbital_sys::{Entity, Outcome, Report, Resolve, Resolver, Sys, WeakSys};
use serde_json::json;
use tracing::{debug, info};

pub const UUID: &str = "orbital/sys/tick";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickConfig {
    pub interval: Duration,
    pub floor: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            floor: Duration::from_millis(10),
        }
    }
}

impl TickConfig {
    /// Read `ORBITAL_TICK_INTERVAL_MS` and `ORBITAL_TICK_FLOOR_MS`.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            interval: millis("ORBITAL_TICK_INTERVAL_MS")?.unwrap_or(defaults.interval),
            floor: millis("ORBITAL_TICK_FLOOR_MS")?.unwrap_or(defaults.floor),
        })
    }

    /// How long to wait after a frame that took `elapsed` to publish.
    pub fn sleep_after(&self, elapsed: Duration) -> Duration {
        self.interval.saturating_sub(elapsed).max(self.floor)
    }
}

fn millis(var: &str) -> Result<Option<Duration>> {
    match env::var(var) {
        Ok(raw) => {
            let ms: u64 = raw
                .parse()
                .with_context(|| format!("{var} must be a whole number of milliseconds"))?;
            Ok(Some(Duration::from_millis(ms)))
        }
        Err(_) => Ok(None),
    }
}

struct Ticker {
    config: TickConfig,
    started: AtomicBool,
}

#[async_trait]
impl Resolve for Ticker {
    async fn resolve(&self, _entity: &Entity, sys: &Sys) -> Result<Outcome> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(Outcome::Continue);
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                info!(
                    sys = sys.uuid(),
                    interval_ms = self.config.interval.as_millis() as u64,
                    "Ticker started"
                );
                handle.spawn(run(sys.downgrade(), self.config));
            }
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                sys.report(Report::collaborator(UUID, format!("cannot start ticker: {e}")));
            }
        }
        Ok(Outcome::Continue)
    }
}

async fn run(sys: WeakSys, config: TickConfig) {
    let origin = Instant::now();
    let mut previous: Option<Instant> = None;
    let mut counter: u64 = 0;

    loop {
        let Some(engine) = sys.upgrade() else {
            debug!(frames = counter, "Engine dropped, ticker stopping");
            return;
        };
        counter += 1;
        let now = Instant::now();
        let delta = previous.map_or(config.interval, |p| now.duration_since(p));
        let frame = json!({
            "uuid": format!("orbital/sys/tick/{counter}"),
            "name": "tick",
            "tick": true,
            "time": now.duration_since(origin).as_secs_f64() * 1000.0,
            "delta": delta.as_secs_f64() * 1000.0,
            "ts": chrono::Utc::now().to_rfc3339(),
        });

        engine.submit(frame).await;
        drop(engine);

        previous = Some(now);
        tokio::time::sleep(config.sleep_after(now.elapsed())).await;
    }
}

pub fn tick_resolver(config: TickConfig) -> Entity {
    Entity::new()
        .with("uuid", UUID)
        .with("description", "publishes a tick frame at a steady rate")
        .with_resolver(Resolver::new(Ticker {
            config,
            started: AtomicBool::new(false),
        }))
}
