//! Cloud OCR client and screen-layout bucketing.
//! Sends the full frame to a Baidu-style general OCR endpoint (base64 image,
//! form POST, OAuth client-credentials token) and gets back recognized lines
//! with pixel locations. A pure bucketing pass then splits the lines into
//! question text and tappable answer options by their vertical position.
//! Requires QUIZTAP_OCR_API_KEY and QUIZTAP_OCR_SECRET_KEY environment
//! variables.

use anyhow::{Context, Result, anyhow, bail};
use base64::{Engine as _, engine::general_purpose};
use image::{DynamicImage, ImageFormat};
use reqwest::Client;
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;

use crate::config::{Config, OcrConfig};

// Token error codes the OCR API uses for an invalid/expired access token.
const ERR_TOKEN_INVALID: i64 = 110;
const ERR_TOKEN_EXPIRED: i64 = 111;

/// A recognized text line with its top-left position on screen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextBox {
    pub text: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// An answer option: text plus the coordinate to tap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptionBox {
    pub text: String,
    pub x: u32,
    pub y: u32,
}

/// The parsed quiz screen: the question and its tappable options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuizScreen {
    pub question: String,
    pub options: Vec<OptionBox>,
}

// *************** API Response Types ***************

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    words_result: Vec<WordResult>,
    error_code: Option<i64>,
    error_msg: Option<String>,
}

#[derive(Deserialize)]
struct WordResult {
    words: String,
    location: Location,
}

#[derive(Deserialize)]
struct Location {
    left: u32,
    top: u32,
    width: u32,
    height: u32,
}

// *************** Client ***************

pub struct OcrClient {
    client: Client,
    config: OcrConfig,
    api_key: String,
    secret_key: String,
    token: Option<String>,
}

impl OcrClient {
    /// Builds a client from QUIZTAP_OCR_API_KEY / QUIZTAP_OCR_SECRET_KEY.
    pub fn from_env(config: &OcrConfig) -> Result<Self> {
        let api_key = std::env::var("QUIZTAP_OCR_API_KEY")
            .context("QUIZTAP_OCR_API_KEY environment variable not set")?;
        let secret_key = std::env::var("QUIZTAP_OCR_SECRET_KEY")
            .context("QUIZTAP_OCR_SECRET_KEY environment variable not set")?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            client,
            config: config.clone(),
            api_key,
            secret_key,
            token: None,
        })
    }

    /// Encodes the frame as PNG and runs it through the OCR endpoint.
    pub async fn recognize_frame(&mut self, frame: &DynamicImage) -> Result<Vec<TextBox>> {
        let mut buf = Cursor::new(Vec::new());
        frame
            .write_to(&mut buf, ImageFormat::Png)
            .context("failed to encode frame as PNG")?;
        self.recognize(buf.get_ref()).await
    }

    /// Recognizes text lines in PNG bytes, refreshing the access token once
    /// if the server reports it invalid or expired.
    pub async fn recognize(&mut self, png: &[u8]) -> Result<Vec<TextBox>> {
        let encoded = general_purpose::STANDARD.encode(png);
        let mut response = self.request(&encoded).await?;
        if needs_token_refresh(&response) {
            self.token = None;
            response = self.request(&encoded).await?;
        }
        to_text_boxes(response)
    }

    async fn request(&mut self, encoded_image: &str) -> Result<RecognizeResponse> {
        let token = self.ensure_token().await?;
        let response = self
            .client
            .post(&self.config.recognize_url)
            .query(&[("access_token", token.as_str())])
            .form(&[("image", encoded_image)])
            .send()
            .await
            .context("failed to send OCR request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("OCR API error {status}: {body}");
        }

        response.json().await.context("failed to parse OCR response")
    }

    async fn ensure_token(&mut self) -> Result<String> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }

        let response = self
            .client
            .post(&self.config.token_url)
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.api_key.as_str()),
                ("client_secret", self.secret_key.as_str()),
            ])
            .send()
            .await
            .context("failed to request OCR access token")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("OCR token endpoint error {status}: {body}");
        }

        let body: TokenResponse = response
            .json()
            .await
            .context("failed to parse OCR token response")?;
        let token = body.access_token.ok_or_else(|| {
            anyhow!(
                "OCR token endpoint returned no access_token: {}",
                body.error_description.unwrap_or_default()
            )
        })?;

        self.token = Some(token.clone());
        Ok(token)
    }
}

/// True when the server rejected our access token (invalid or expired) and a
/// fresh token fetch is worth one retry. Any other error code goes straight
/// to the caller.
fn needs_token_refresh(response: &RecognizeResponse) -> bool {
    matches!(
        response.error_code,
        Some(ERR_TOKEN_INVALID) | Some(ERR_TOKEN_EXPIRED)
    )
}

fn to_text_boxes(response: RecognizeResponse) -> Result<Vec<TextBox>> {
    if let Some(code) = response.error_code {
        bail!(
            "OCR API returned error {code}: {}",
            response.error_msg.unwrap_or_default()
        );
    }
    Ok(response
        .words_result
        .into_iter()
        .map(|w| TextBox {
            text: w.words,
            x: w.location.left,
            y: w.location.top,
            width: w.location.width,
            height: w.location.height,
        })
        .collect())
}

// *************** Layout Bucketing ***************

/// Splits recognized lines into question text and answer options by their
/// vertical position.
///
/// Lines lying strictly inside the question band are concatenated in OCR
/// order into the question; lines starting below `options_min_y` become
/// options carrying their top-left coordinate (the tap target). Returns
/// `None` when no question text or no options were found, which tells the
/// caller the screen is mid-transition and worth re-polling.
pub fn bucket_boxes(boxes: &[TextBox], config: &Config) -> Option<QuizScreen> {
    let mut question = String::new();
    let mut options = Vec::new();

    for b in boxes {
        let y_min = b.y;
        let y_max = b.y + b.height;
        if y_min > config.question_band_top && y_max < config.question_band_bottom {
            question.push_str(&b.text);
        }
        if y_min > config.options_min_y {
            options.push(OptionBox {
                text: b.text.clone(),
                x: b.x,
                y: b.y,
            });
        }
    }

    if question.trim().is_empty() || options.is_empty() {
        return None;
    }
    Some(QuizScreen { question, options })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tb(text: &str, x: u32, y: u32, width: u32, height: u32) -> TextBox {
        TextBox {
            text: text.to_string(),
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn test_bucket_splits_question_and_options() {
        let config = Config::default();
        let boxes = vec![
            tb("Score: 120", 300, 30, 120, 30),
            tb("Which poet wrote", 80, 520, 400, 40),
            tb("\"Quiet Night Thoughts\"?", 80, 580, 420, 40),
            tb("Li Bai", 120, 760, 150, 36),
            tb("Du Fu", 120, 860, 150, 36),
            tb("Wang Wei", 120, 960, 180, 36),
            tb("Bai Juyi", 120, 1060, 160, 36),
        ];
        let screen = bucket_boxes(&boxes, &config).unwrap();
        assert_eq!(screen.question, "Which poet wrote\"Quiet Night Thoughts\"?");
        assert_eq!(screen.options.len(), 4);
        assert_eq!(screen.options[0].text, "Li Bai");
        assert_eq!((screen.options[0].x, screen.options[0].y), (120, 760));
    }

    #[test]
    fn test_bucket_excludes_boxes_straddling_band_bottom() {
        let config = Config::default();
        // Starts inside the band but spills past its bottom edge
        let boxes = vec![tb("half in", 80, 690, 200, 40), tb("A", 120, 760, 40, 36)];
        assert!(bucket_boxes(&boxes, &config).is_none());
    }

    #[test]
    fn test_bucket_none_when_question_missing() {
        let config = Config::default();
        let boxes = vec![tb("Li Bai", 120, 760, 150, 36)];
        assert!(bucket_boxes(&boxes, &config).is_none());
    }

    #[test]
    fn test_bucket_none_when_options_missing() {
        let config = Config::default();
        let boxes = vec![tb("Which poet?", 80, 520, 300, 40)];
        assert!(bucket_boxes(&boxes, &config).is_none());
    }

    #[test]
    fn test_bucket_none_on_empty_input() {
        assert!(bucket_boxes(&[], &Config::default()).is_none());
    }

    #[test]
    fn test_recognize_response_maps_locations() {
        let json = r#"{
            "log_id": 123456,
            "words_result_num": 2,
            "words_result": [
                { "words": "hello", "location": { "left": 10, "top": 20, "width": 30, "height": 40 } },
                { "words": "world", "location": { "left": 50, "top": 60, "width": 70, "height": 80 } }
            ]
        }"#;
        let response: RecognizeResponse = serde_json::from_str(json).unwrap();
        let boxes = to_text_boxes(response).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0], tb("hello", 10, 20, 30, 40));
        assert_eq!(boxes[1], tb("world", 50, 60, 70, 80));
    }

    #[test]
    fn test_recognize_response_surfaces_api_error() {
        let json = r#"{ "error_code": 17, "error_msg": "Open api daily request limit reached" }"#;
        let response: RecognizeResponse = serde_json::from_str(json).unwrap();
        let err = to_text_boxes(response).unwrap_err();
        assert!(err.to_string().contains("17"));
        assert!(err.to_string().contains("daily request limit"));
    }

    fn response_with_code(code: Option<i64>) -> RecognizeResponse {
        RecognizeResponse {
            words_result: Vec::new(),
            error_code: code,
            error_msg: None,
        }
    }

    #[test]
    fn test_token_refresh_on_invalid_token_code() {
        assert!(needs_token_refresh(&response_with_code(Some(110))));
    }

    #[test]
    fn test_token_refresh_on_expired_token_code() {
        assert!(needs_token_refresh(&response_with_code(Some(111))));
    }

    #[test]
    fn test_no_token_refresh_on_other_error_code() {
        // Quota errors etc. must surface, not trigger a pointless refetch
        assert!(!needs_token_refresh(&response_with_code(Some(17))));
    }

    #[test]
    fn test_no_token_refresh_on_success() {
        assert!(!needs_token_refresh(&response_with_code(None)));
    }

    #[test]
    fn test_token_error_still_fails_after_one_refresh() {
        // The refresh branch runs once; a second token rejection must come
        // back as an error instead of looping.
        let err = to_text_boxes(response_with_code(Some(111))).unwrap_err();
        assert!(err.to_string().contains("111"));
    }

    #[test]
    fn test_recognize_response_empty_result_is_ok() {
        let json = r#"{ "words_result": [] }"#;
        let response: RecognizeResponse = serde_json::from_str(json).unwrap();
        assert!(to_text_boxes(response).unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires QUIZTAP_OCR_API_KEY and QUIZTAP_OCR_SECRET_KEY"]
    async fn test_real_token_fetch() {
        let mut client = OcrClient::from_env(&OcrConfig::default()).unwrap();
        let token = client.ensure_token().await.unwrap();
        assert!(!token.is_empty());
    }
}
