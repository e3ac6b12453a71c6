//! LLM answer picker.
//! Sends the question and the enumerated option texts to a chat-completion
//! endpoint and asks for the zero-based index of the correct option.
//! Malformed or out-of-range replies are retried with a fixed delay, up to
//! the configured budget; network/API errors count against the same budget.
//! Requires QUIZTAP_LLM_API_KEY environment variable.

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::ocr::OptionBox;

// *************** Request/Response Types ***************

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

// *************** Client ***************

pub struct LlmClient {
    client: Client,
    config: LlmConfig,
    api_key: String,
}

impl LlmClient {
    /// Builds a client from QUIZTAP_LLM_API_KEY.
    pub fn from_env(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("QUIZTAP_LLM_API_KEY")
            .context("QUIZTAP_LLM_API_KEY environment variable not set")?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            client,
            config: config.clone(),
            api_key,
        })
    }

    /// Asks the model which option answers the question, returning its index.
    ///
    /// Each attempt is a full request/parse/validate cycle; a malformed reply
    /// and a network error are both just a failed attempt. After the last
    /// failure the last error is returned and the caller skips the question.
    pub async fn pick_option(&self, question: &str, options: &[OptionBox]) -> Result<usize> {
        if options.is_empty() {
            bail!("cannot pick an answer from an empty option list");
        }

        let prompt = build_prompt(question, options);
        let request = ChatRequest {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
        };

        let mut last_error = None;
        for attempt in 1..=self.config.max_retries {
            let result = match self.ask(&request).await {
                Ok(reply) => {
                    debug!("model replied: {reply}");
                    parse_option_index(&reply, options.len())
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(index) => return Ok(index),
                Err(e) => {
                    warn!(
                        "answer attempt {attempt}/{} failed: {e:#}",
                        self.config.max_retries
                    );
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms))
                            .await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("no answer attempts were made")))
    }

    async fn ask(&self, request: &ChatRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .context("failed to send chat-completion request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("chat-completion API error {status}: {body}");
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .context("failed to parse chat-completion response")?;

        api_response
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| anyhow!("chat-completion response contained no choices"))
    }
}

// *************** Prompt & Reply Parsing ***************

/// Builds the prompt: the question, the options numbered from 0, and a hard
/// instruction to reply with the bare index.
pub fn build_prompt(question: &str, options: &[OptionBox]) -> String {
    let mut listed = String::new();
    for (i, option) in options.iter().enumerate() {
        // write! into a String cannot fail
        let _ = writeln!(listed, "{}: {}", i, option.text);
    }
    format!(
        "You are an expert at multiple-choice quiz questions. Pick the correct option.\n\n\
         Question: {question}\n\n\
         Options:\n{listed}\n\
         Reply with ONLY the number of the correct option. \
         No explanation, no punctuation, nothing but the number."
    )
}

/// Parses the model reply as a zero-based option index.
/// Anything that is not a bare in-range integer counts as malformed.
pub fn parse_option_index(reply: &str, n_options: usize) -> Result<usize> {
    let trimmed = reply.trim();
    let index: usize = trimmed
        .parse()
        .map_err(|_| anyhow!("model reply is not a plain option index: {trimmed:?}"))?;
    if index >= n_options {
        bail!("model picked option {index} but only {n_options} options exist");
    }
    Ok(index)
}

// *************** Tests ***************

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(texts: &[&str]) -> Vec<OptionBox> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| OptionBox {
                text: t.to_string(),
                x: 120,
                y: 760 + 100 * i as u32,
            })
            .collect()
    }

    #[test]
    fn test_build_prompt_contains_question_and_options() {
        let options = opts(&["Li Bai", "Du Fu"]);
        let prompt = build_prompt("Who wrote it?", &options);
        assert!(prompt.contains("Question: Who wrote it?"));
        assert!(prompt.contains("0: Li Bai"));
        assert!(prompt.contains("1: Du Fu"));
        assert!(prompt.contains("ONLY the number"));
    }

    #[test]
    fn test_build_prompt_omits_coordinates() {
        let options = opts(&["Li Bai"]);
        let prompt = build_prompt("Who wrote it?", &options);
        assert!(!prompt.contains("760"));
    }

    #[test]
    fn test_parse_accepts_plain_index() {
        assert_eq!(parse_option_index("2", 4).unwrap(), 2);
    }

    #[test]
    fn test_parse_accepts_surrounding_whitespace() {
        assert_eq!(parse_option_index(" 1\n", 4).unwrap(), 1);
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(parse_option_index("The answer is 2", 4).is_err());
    }

    #[test]
    fn test_parse_rejects_trailing_punctuation() {
        assert!(parse_option_index("2.", 4).is_err());
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        let err = parse_option_index("4", 4).unwrap_err();
        assert!(err.to_string().contains("only 4 options"));
    }

    #[test]
    fn test_parse_rejects_negative() {
        assert!(parse_option_index("-1", 4).is_err());
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(parse_option_index("", 4).is_err());
        assert!(parse_option_index("   ", 4).is_err());
    }

    #[tokio::test]
    #[ignore = "requires QUIZTAP_LLM_API_KEY"]
    async fn test_real_api_pick() {
        // Run with: QUIZTAP_LLM_API_KEY=sk-... cargo test test_real_api_pick -- --ignored
        let client = LlmClient::from_env(&LlmConfig::default()).unwrap();
        let options = opts(&["3", "4", "5", "22"]);
        let index = client.pick_option("What is 2 + 2?", &options).await.unwrap();
        assert_eq!(index, 1);
    }
}
