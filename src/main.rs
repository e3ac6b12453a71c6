mod adb;
mod config;
mod detect;
mod flow;
mod llm;
mod ocr;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use image::DynamicImage;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::adb::Device;
use crate::config::Config;
use crate::llm::LlmClient;
use crate::ocr::OcrClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Parse CLI arguments
    let matches = Command::new("quiztap")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Plays a phone quiz game: screenshot, OCR, ask an LLM, tap the answer")
        .arg(
            Arg::new("serial")
                .long("serial")
                .value_name("SERIAL")
                .help("adb device serial (skips the selection prompt)"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .default_value("quiztap.json")
                .help("Path to the JSON config file"),
        )
        .arg(
            Arg::new("matches")
                .long("matches")
                .value_name("N")
                .value_parser(clap::value_parser!(u32))
                .help("Stop after N matches (default: run until interrupted)"),
        )
        .get_matches();

    let config_path = PathBuf::from(matches.get_one::<String>("config").unwrap()); // Safe due to default
    let config = Config::load(&config_path)?;

    let device = Device::pick(matches.get_one::<String>("serial").cloned())
        .await
        .context("failed to resolve an adb device")?;
    let mut ocr = OcrClient::from_env(&config.ocr)?;
    let llm = LlmClient::from_env(&config.llm)?;
    let max_matches = matches.get_one::<u32>("matches").copied();

    info!("quiztap starting; press Ctrl+C to stop");

    // Frame of the last answered question; None until the first answer so the
    // very first poll always counts as a new question.
    let mut last_frame: Option<DynamicImage> = None;
    let mut played = 0u32;

    loop {
        info!("match {} starting", played + 1);
        for number in 1..=config.questions_per_match {
            answer_question(&device, &mut ocr, &llm, &config, &mut last_frame, number).await?;
        }
        played += 1;

        // Nothing left to navigate to once the limit is reached; exit without
        // sitting through the scoreboard wait.
        if reached_match_limit(played, max_matches) {
            break;
        }

        info!("match {played} finished, waiting for the scoreboard");
        tokio::time::sleep(Duration::from_millis(config.match_end_wait_ms)).await;

        flow::run_tap_script(&device, &config.next_match_taps)
            .await
            .context("next-match navigation failed")?;
    }

    info!("done after {played} matches");
    Ok(())
}

/// True when `--matches N` was given and N matches have been played.
fn reached_match_limit(played: u32, max_matches: Option<u32>) -> bool {
    max_matches.is_some_and(|max| played >= max)
}

/// Polls until a new question is on screen, then runs it through the
/// OCR -> LLM -> tap pipeline.
///
/// An unreadable screen (no question/options found) just re-polls. A question
/// the model never answers within its retry budget is skipped: it still
/// consumes one slot of the match, but `last_frame` keeps the previous
/// answered question so the detector fires again on the next redraw.
async fn answer_question(
    device: &Device,
    ocr: &mut OcrClient,
    llm: &LlmClient,
    config: &Config,
    last_frame: &mut Option<DynamicImage>,
    number: u32,
) -> Result<()> {
    loop {
        let frame = device
            .screencap()
            .await
            .context("failed to capture screenshot")?;
        if !detect::question_changed(last_frame.as_ref(), &frame, config)? {
            tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
            continue;
        }

        // The question may still be fading in; give it a moment and re-pull.
        tokio::time::sleep(Duration::from_millis(config.settle_delay_ms)).await;
        let frame = device
            .screencap()
            .await
            .context("failed to capture settled screenshot")?;

        let boxes = ocr
            .recognize_frame(&frame)
            .await
            .context("OCR request failed")?;
        let Some(screen) = ocr::bucket_boxes(&boxes, config) else {
            tokio::time::sleep(Duration::from_millis(config.layout_retry_delay_ms)).await;
            continue;
        };
        info!(
            "question {number}: {} ({} options)",
            screen.question,
            screen.options.len()
        );

        match llm.pick_option(&screen.question, &screen.options).await {
            Ok(index) => {
                let option = &screen.options[index];
                info!(
                    "answering question {number} with option {index}: {} at ({}, {})",
                    option.text, option.x, option.y
                );
                device
                    .tap(option.x, option.y)
                    .await
                    .context("failed to tap the answer")?;
                *last_frame = Some(frame);
            }
            Err(e) => warn!("giving up on question {number}: {e:#}"),
        }
        return Ok(());
    }
}
