use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Roast API request format
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct RoastRequest {
    #[serde(default)]
    pub tickers: Vec<String>,
}

// Per-ticker analysis
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Stock {
    pub company: String,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
}

// Roast API response format
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct RoastResponse {
    pub roast: String,
    pub stocks: BTreeMap<String, Stock>,
}

// Gemini generateContent request / response, only the fields we use
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct GeminiRequest {
    pub contents: Vec<Content>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Candidate {
    #[serde(default)]
    pub content: Content,
}

impl GeminiRequest {
    pub fn from_prompt(prompt: &str) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        }
    }
}

impl GeminiResponse {
    // Text of the first part of the first candidate
    pub fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content
            .parts
            .into_iter()
            .next()
            .map(|p| p.text)
    }
}
