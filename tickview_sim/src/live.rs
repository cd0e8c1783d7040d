//! Real-time driver.
//!
//! The simulation ticks on one tokio interval and the presenters render on
//! another. Neither waits for the other: a presenter frame reads whatever
//! tick was published last.

use std::time::Duration;

use serde::Serialize;
use tickview_core::shared;
use tickview_env::{TickContext, TokioContext};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::arena::{hud_contract, HERO_COOLDOWN};
use crate::error::SimResult;
use crate::presenter::{Cadence, Presenter, ScanMode};
use crate::world::{SimConfig, SimWorld, WorldStats};

/// What a live run did.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSummary {
    pub ticks: u64,
    /// Presenter frames rendered
    pub frames: u64,
    /// Wall-clock seconds
    pub elapsed_secs: f64,
    pub stats: WorldStats,
}

/// Runs `ticks` simulation ticks at the configured rate with a HUD
/// rendering at `frame_hz`.
pub async fn run_live(config: SimConfig, frame_hz: u32, ticks: u64) -> SimResult<LiveSummary> {
    let wall = TokioContext::shared();
    let tick_duration = config.tick_duration();
    let mut world = SimWorld::new(config)?;
    let schema = std::sync::Arc::clone(world.schema());
    let hud = world.add_presenter(Presenter::bind(
        "hud",
        &hud_contract(),
        &schema,
        Cadence::EVERY_TICK,
        ScanMode::Versions,
    ));
    let block_slot = schema.slot(shared::BLOCK_REASON);

    let mut sim = time::interval(tick_duration);
    let mut frame = time::interval(Duration::from_secs_f64(1.0 / frame_hz.max(1) as f64));
    // A slow renderer drops frames; the simulation never does
    frame.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Live run: {} ticks at {:.0} Hz, HUD at {} Hz",
        ticks,
        1.0 / tick_duration.as_secs_f64(),
        frame_hz
    );

    let mut frames = 0u64;
    while world.now().get() < ticks {
        tokio::select! {
            _ = sim.tick() => {
                let report = world.step()?;
                world.clock().advance_time(tick_duration);
                if let Some(selected) = report.selected {
                    debug!("{}: {} by {}", report.tick, selected.intent.action, selected.source);
                }
            }
            _ = frame.tick() => {
                world.observe_all();
                frames += 1;
                let view = world.presenter(hud);
                debug!(
                    "HUD @{:?}: cooldown={} block={}",
                    view.last_seen(),
                    view.value(HERO_COOLDOWN),
                    block_slot.map_or_else(
                        || "-".to_string(),
                        |slot| view.decode_enum(&schema, shared::BLOCK_REASON_ENUM, slot),
                    ),
                );
            }
        }
    }

    let summary = LiveSummary {
        ticks: world.now().get(),
        frames,
        elapsed_secs: wall.now().as_secs_f64(),
        stats: world.stats(),
    };
    info!(
        "Live run finished: {} ticks, {} HUD frames, {} enemies left, {:.2}s",
        summary.ticks,
        summary.frames,
        world.domain().enemies().iter().filter(|e| e.is_alive()).count(),
        summary.elapsed_secs
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_live_runs_requested_ticks() {
        let config = SimConfig {
            tick_rate_hz: 500,
            ..Default::default()
        };
        let summary = run_live(config, 250, 20).await.unwrap();
        assert_eq!(summary.ticks, 20);
        assert_eq!(summary.stats.ticks, 20);
        assert!(summary.frames >= 1);
        assert_eq!(summary.stats.automated_actions, 2);
    }
}
