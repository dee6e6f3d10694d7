//! Gemini API client
//!
//! Non-streaming `generateContent` client. Agents build prompts and parse
//! model output; this module only moves text across the wire and maps
//! transport failures onto the error taxonomy (429 → rate limited,
//! request timeout → timeout) so recovery can classify them.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::GeminiConfig;
use crate::{Error, Result};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-request generation knobs.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_output_tokens: 8192,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

/// Gemini `generateContent` client
pub struct GeminiClient {
    api_base: String,
    api_key: String,
    model: String,
    max_output_tokens: u32,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Gemini(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base: GEMINI_API_BASE.to_string(),
            api_key,
            model: config.model.clone(),
            max_output_tokens: config.max_output_tokens,
            client,
        })
    }

    /// Send one prompt and return the concatenated text of the first
    /// candidate.
    pub async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base, self.model, self.api_key
        );
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_output_tokens.min(self.max_output_tokens),
            },
        };

        let response = match self.client.post(&url).json(&request).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(Error::Timeout(format!(
                    "gemini request exceeded {REQUEST_TIMEOUT:?}"
                )))
            }
            Err(e) => return Err(e.into()),
        };

        match response.status() {
            StatusCode::OK => {}
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(Error::RateLimited("gemini quota exhausted".to_string()))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Gemini(format!(
                    "generateContent returned {status}: {body}"
                )));
            }
        }

        let parsed: GenerateResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(Error::ModelOutput(
                "gemini returned no candidates".to_string(),
            ));
        }
        Ok(text)
    }
}

/// Extract the first JSON object from model output, tolerating markdown
/// fences and prose around it.
pub fn extract_json_object(text: &str) -> Result<serde_json::Value> {
    let trimmed = text.trim();

    // Fenced block first: ```json ... ``` or plain ``` ... ```
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if let Ok(value) = serde_json::from_str(inner) {
                return Ok(value);
            }
        }
    }

    // Otherwise the widest braces-delimited slice.
    if let (Some(open), Some(close)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if open < close {
            if let Ok(value) = serde_json::from_str(&trimmed[open..=close]) {
                return Ok(value);
            }
        }
    }

    // Snippet must end on a char boundary; model output is arbitrary UTF-8.
    let mut end = trimmed.len().min(200);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    Err(Error::ModelOutput(format!(
        "no JSON object found in model output: {}",
        &trimmed[..end]
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json() {
        let text = "Here is the analysis:\n```json\n{\"type\": \"bug\"}\n```\nDone.";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["type"], "bug");
    }

    #[test]
    fn extracts_bare_json_embedded_in_prose() {
        let text = "Sure! {\"complexity\": \"simple\", \"requirements\": []} hope that helps";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["complexity"], "simple");
    }

    #[test]
    fn rejects_output_without_json() {
        let err = extract_json_object("I could not analyze this issue.").unwrap_err();
        assert!(matches!(err, Error::ModelOutput(_)));
    }

    #[test]
    fn long_multibyte_output_without_json_is_rejected_not_truncated_mid_char() {
        // 300 bytes of 3-byte chars: byte 200 is inside a character.
        let text = "日".repeat(100);
        let err = extract_json_object(&text).unwrap_err();
        assert!(matches!(err, Error::ModelOutput(_)));
        assert!(err.to_string().contains('日'));
    }

    #[test]
    fn fenced_block_without_language_tag() {
        let text = "```\n{\"ok\": true}\n```";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["ok"], true);
    }
}
