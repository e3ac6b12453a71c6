//! Config module.
//! Loads quiztap.json (screen regions, thresholds, timings, tap script,
//! API endpoints) with built-in defaults for the supported game layout.
//! Uses serde for JSON serialization.
//! API credentials come from the environment, never from this file.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// A pixel rectangle on the device screen.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One step of the next-match navigation script: tap, then wait.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TapStep {
    pub x: u32,
    pub y: u32,
    pub wait_ms: u64,
}

/// Chat-completion endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
    /// Attempts before giving up on a question (covers network errors and
    /// malformed replies alike).
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_retries: 10,
            retry_delay_ms: 2000,
            timeout_secs: 30,
        }
    }
}

/// Cloud OCR endpoint settings (Baidu-style general OCR with word locations).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub token_url: String,
    pub recognize_url: String,
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            token_url: "https://aip.baidubce.com/oauth/2.0/token".to_string(),
            recognize_url: "https://aip.baidubce.com/rest/2.0/ocr/v1/general".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Complete runtime configuration.
///
/// The defaults describe the quiz layout this tool was written against
/// (720x1280 portrait): the header region that redraws when a new question
/// comes in, the vertical band holding the question text, and the area
/// below it holding the tappable options.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Region watched for the new-question redraw.
    pub diff_region: Region,
    /// Mean grayscale difference above this means a transition animation is
    /// still playing; only the band between 0 and the threshold counts as a
    /// freshly drawn question.
    pub diff_threshold: f32,
    /// Sleep between unchanged polls.
    pub poll_interval_ms: u64,
    /// Wait after a change is seen before the OCR capture, so the question
    /// finishes fading in.
    pub settle_delay_ms: u64,
    /// Sleep before re-polling when OCR finds no question on screen.
    pub layout_retry_delay_ms: u64,
    /// Text boxes fully inside (question_band_top, question_band_bottom)
    /// concatenate into the question.
    pub question_band_top: u32,
    pub question_band_bottom: u32,
    /// Text boxes starting below this are answer options.
    pub options_min_y: u32,
    pub questions_per_match: u32,
    /// Wait for the scoreboard after the last question of a match.
    pub match_end_wait_ms: u64,
    /// Tap script that dismisses the scoreboard and starts the next match.
    pub next_match_taps: Vec<TapStep>,
    pub llm: LlmConfig,
    pub ocr: OcrConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            diff_region: Region {
                x: 320,
                y: 65,
                width: 79,
                height: 44,
            },
            diff_threshold: 10.0,
            poll_interval_ms: 300,
            settle_delay_ms: 300,
            layout_retry_delay_ms: 500,
            question_band_top: 495,
            question_band_bottom: 710,
            options_min_y: 710,
            questions_per_match: 8,
            match_end_wait_ms: 16000,
            next_match_taps: vec![
                TapStep { x: 357, y: 1027, wait_ms: 2000 },
                TapStep { x: 519, y: 1226, wait_ms: 2000 },
                TapStep { x: 384, y: 1214, wait_ms: 2000 },
                TapStep { x: 374, y: 1123, wait_ms: 5000 },
                TapStep { x: 384, y: 1214, wait_ms: 1000 },
                TapStep { x: 374, y: 1123, wait_ms: 1000 },
            ],
            llm: LlmConfig::default(),
            ocr: OcrConfig::default(),
        }
    }
}

impl Config {
    /// Loads the config file, falling back to the built-in defaults when the
    /// file does not exist. A file that exists but fails to parse is a hard
    /// error rather than a silent fallback.
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            info!("{} not found, using built-in defaults", path.display());
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_json(contents: &str) -> Result<Config> {
        let config: Config = serde_json::from_str(contents).context("failed to parse JSON")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.diff_region.width == 0 || self.diff_region.height == 0 {
            bail!("diff_region must have a non-zero width and height");
        }
        if self.questions_per_match == 0 {
            bail!("questions_per_match must be at least 1");
        }
        if self.question_band_top >= self.question_band_bottom {
            bail!(
                "question band is inverted: top {} must be above bottom {}",
                self.question_band_top,
                self.question_band_bottom
            );
        }
        if self.options_min_y < self.question_band_bottom {
            bail!(
                "options_min_y {} overlaps the question band ending at {}",
                self.options_min_y,
                self.question_band_bottom
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.questions_per_match, 8);
        assert_eq!(config.diff_region.x, 320);
        assert_eq!(config.next_match_taps.len(), 6);
    }

    #[test]
    fn test_partial_json_keeps_defaults_elsewhere() {
        let config = Config::from_json(r#"{ "questions_per_match": 5 }"#).unwrap();
        assert_eq!(config.questions_per_match, 5);
        // Untouched fields stay at their defaults
        assert_eq!(config.diff_threshold, 10.0);
        assert_eq!(config.llm.max_retries, 10);
    }

    #[test]
    fn test_nested_override() {
        let config =
            Config::from_json(r#"{ "llm": { "model": "gpt-4o", "max_retries": 3 } }"#).unwrap();
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.max_retries, 3);
        assert_eq!(config.llm.retry_delay_ms, 2000);
    }

    #[test]
    fn test_rejects_zero_size_diff_region() {
        let result = Config::from_json(
            r#"{ "diff_region": { "x": 0, "y": 0, "width": 0, "height": 44 } }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_questions() {
        assert!(Config::from_json(r#"{ "questions_per_match": 0 }"#).is_err());
    }

    #[test]
    fn test_rejects_inverted_question_band() {
        let result = Config::from_json(
            r#"{ "question_band_top": 710, "question_band_bottom": 495 }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_options_overlapping_question_band() {
        // Options starting above the band bottom would double-bucket lines
        let result = Config::from_json(r#"{ "options_min_y": 600 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_options_min_y_at_band_bottom_is_allowed() {
        // The default layout: options start exactly where the band ends
        let config = Config::from_json(r#"{ "options_min_y": 710 }"#).unwrap();
        assert_eq!(config.options_min_y, config.question_band_bottom);
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(Config::from_json("{ not json").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load(Path::new("definitely/not/here/quiztap.json")).unwrap();
        assert_eq!(config.questions_per_match, 8);
    }

    #[test]
    fn test_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back = Config::from_json(&json).unwrap();
        assert_eq!(back.options_min_y, config.options_min_y);
        assert_eq!(back.next_match_taps.len(), config.next_match_taps.len());
    }
}
