//! `generateContent` wire types. Requests borrow the prompt; responses are
//! lenient, every field optional or defaulted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest<'a> {
    pub contents: [UserTurn<'a>; 1],
    pub generation_config: SamplingConfig,
}

#[derive(Debug, Serialize)]
pub struct UserTurn<'a> {
    pub role: &'static str,
    pub parts: [TextPart<'a>; 1],
}

#[derive(Debug, Serialize)]
pub struct TextPart<'a> {
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingConfig {
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl<'a> GenerateRequest<'a> {
    pub fn user_prompt(prompt: &'a str, max_tokens: u32, temperature: f32) -> Self {
        Self {
            contents: [UserTurn {
                role: "user",
                parts: [TextPart { text: prompt }],
            }],
            generation_config: SamplingConfig {
                max_output_tokens: max_tokens,
                temperature,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GenerateResponse {
    pub candidates: Vec<ResponseCandidate>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResponseCandidate {
    pub content: Option<ResponseContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResponseContent {
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResponsePart {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub code: Option<u16>,
    pub message: Option<String>,
    /// Canonical status name, e.g. `RESOURCE_EXHAUSTED`.
    pub status: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate with its parts joined; `None` when blank.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content.parts.iter().map(|p| p.text.as_str()).collect();
        (!text.trim().is_empty()).then_some(text)
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.candidates.first()?.finish_reason.as_deref()
    }
}
