//! Next-match navigation.
//! Replays the configured tap script that dismisses the scoreboard and
//! starts the next match. Pure sequencing, no state.

use anyhow::Result;
use std::time::Duration;
use tracing::info;

use crate::adb::Device;
use crate::config::TapStep;

/// Taps each step's coordinates, then waits the step's delay.
/// An empty script is a no-op.
pub async fn run_tap_script(device: &Device, steps: &[TapStep]) -> Result<()> {
    for step in steps {
        info!("navigation tap at ({}, {})", step.x, step.y);
        device.tap(step.x, step.y).await?;
        tokio::time::sleep(Duration::from_millis(step.wait_ms)).await;
    }
    Ok(())
}
