//! Request envelopes for the supported generative-text vendors.
//!
//! Every provider receives the same prompt; they differ only in endpoint,
//! auth placement, JSON envelope and where the generated text sits in the
//! response.

use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use url::Url;

/// Sampling settings shared by all providers.
const TEMPERATURE: f32 = 0.7;
const MAX_OUTPUT_TOKENS: u32 = 1000;

/// Closed set of supported vendors, chosen once when the config is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    OpenRouter,
    Gemini,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provider::OpenAi => "openai",
            Provider::OpenRouter => "openrouter",
            Provider::Gemini => "gemini",
        })
    }
}

/// Prompt text, split the way chat-style APIs expect it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Provider {
    pub fn default_model(self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o-mini",
            Provider::OpenRouter => "openai/gpt-4o-mini",
            Provider::Gemini => "gemini-pro",
        }
    }

    /// API root; tests point this at a mock server.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    /// Full endpoint URL. Never carries the credential.
    pub fn endpoint(self, base_url: &str, model: &str) -> Result<Url, url::ParseError> {
        let base = base_url.trim_end_matches('/');
        match self {
            Provider::OpenAi | Provider::OpenRouter => {
                Url::parse(&format!("{base}/chat/completions"))
            }
            Provider::Gemini => Url::parse(&format!("{base}/models/{model}:generateContent")),
        }
    }

    /// Header carrying the API key: `Authorization: Bearer` for the
    /// chat-completions vendors, `x-goog-api-key` for Gemini.
    pub fn auth_header(self) -> &'static str {
        match self {
            Provider::OpenAi | Provider::OpenRouter => "authorization",
            Provider::Gemini => "x-goog-api-key",
        }
    }

    /// Whether the credential travels as a bearer token.
    pub fn uses_bearer_auth(self) -> bool {
        !matches!(self, Provider::Gemini)
    }

    pub fn request_body(self, model: &str, prompt: &Prompt) -> Value {
        match self {
            Provider::OpenAi | Provider::OpenRouter => json!({
                "model": model,
                "messages": [
                    { "role": "system", "content": prompt.system },
                    { "role": "user", "content": prompt.user },
                ],
                "max_tokens": MAX_OUTPUT_TOKENS,
                "temperature": TEMPERATURE,
            }),
            // No system role on generateContent; the system text leads the user turn.
            Provider::Gemini => json!({
                "contents": [
                    { "parts": [ { "text": format!("{}\n\n{}", prompt.system, prompt.user) } ] }
                ],
                "generationConfig": {
                    "temperature": TEMPERATURE,
                    "maxOutputTokens": MAX_OUTPUT_TOKENS,
                    "topP": 0.8,
                    "topK": 40,
                },
            }),
        }
    }

    /// JSON pointer to the generated text in a successful response.
    pub fn response_text_pointer(self) -> &'static str {
        match self {
            Provider::OpenAi | Provider::OpenRouter => "/choices/0/message/content",
            Provider::Gemini => "/candidates/0/content/parts/0/text",
        }
    }

    /// System preamble. Gemini gets a terser one since it is inlined.
    pub fn system_prompt(self) -> &'static str {
        match self {
            Provider::OpenAi | Provider::OpenRouter => {
                "You are a content enhancement assistant. You will receive content improvement \
                 instructions and return JSON with enhanced title and description fields."
            }
            Provider::Gemini => "You are a content enhancement assistant. Return only valid JSON.",
        }
    }
}
