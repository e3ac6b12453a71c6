//! Question-change detection.
//! Watches a small fixed region of the frame (the question header) and
//! measures the mean grayscale difference against the previous answered
//! question's frame. Identical frames give 0; a half-played transition
//! animation gives a large value. Only the band in between means a freshly
//! drawn question is on screen and stable enough to OCR.

use anyhow::{Result, bail};
use image::{DynamicImage, GenericImageView, Luma};
use imageproc::map::map_colors2;
use tracing::debug;

use crate::config::{Config, Region};

/// Mean absolute grayscale difference between the two frames inside `region`.
pub fn region_mean_diff(prev: &DynamicImage, cur: &DynamicImage, region: &Region) -> Result<f32> {
    for (name, frame) in [("previous", prev), ("current", cur)] {
        let (width, height) = frame.dimensions();
        if region.x.saturating_add(region.width) > width
            || region.y.saturating_add(region.height) > height
        {
            bail!(
                "diff region ({},{},{},{}) exceeds the {name} frame dimensions {width}x{height}",
                region.x,
                region.y,
                region.width,
                region.height
            );
        }
    }

    let a = prev
        .crop_imm(region.x, region.y, region.width, region.height)
        .to_luma8();
    let b = cur
        .crop_imm(region.x, region.y, region.width, region.height)
        .to_luma8();

    let diff = map_colors2(&a, &b, |p, q| Luma([p[0].abs_diff(q[0])]));
    let total: u64 = diff.pixels().map(|p| u64::from(p[0])).sum();
    Ok(total as f32 / (region.width * region.height) as f32)
}

/// Decides whether a new question is on screen.
///
/// `prev` is the frame of the last question that was answered; `None` means
/// the first poll of the session and always counts as changed.
pub fn question_changed(
    prev: Option<&DynamicImage>,
    cur: &DynamicImage,
    config: &Config,
) -> Result<bool> {
    let Some(prev) = prev else {
        return Ok(true);
    };
    let mean = region_mean_diff(prev, cur, &config.diff_region)?;
    debug!("diff region mean difference: {mean:.2}");
    Ok(mean > 0.0 && mean < config.diff_threshold)
}
