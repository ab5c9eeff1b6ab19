use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::GeminiConfig;
use crate::fetch::decode_image;
use crate::models::{Assessment, ImageAsset, ProductRecord, StructuredProduct};

// ── Sentinels ────────────────────────────────────────────────────────────────

pub const NO_IMAGES_DOWNLOADED: &str = "No images were successfully downloaded.";
pub const NO_VALID_IMAGES: &str = "No valid images found in the provided data.";
pub const PARSE_FAILURE: &str = "Failed to parse JSON output";

// ── Prompts ──────────────────────────────────────────────────────────────────

const ANALYSIS_PROMPT: &str = "\
Analyze the given images of a food product and its packaging.
Extract useful information like Product Info, Ingredients, Nutritional Information, Claims.
When extracting nutritional information also mention the scale of the measurement \
(per serving, per 100g, ...) so that all products can be brought to the same scale.
Return the response in markdown format.";

// Nutrient values are always expressed for the whole pack.
const SYNTHESIS_INSTRUCTIONS: &str = "\
- Identify claims as promises about nutrition, strength, fruit content and similar. \
Ignore claims about taste; only health related claims of the product matter.
- Categorize the purpose and frequency of the product correctly.
- Identifying the weight of the product is very important, keep it accurate.
- Convert the nutrient information into a list of individual nutrient details separated by commas. \
Each nutrient name is followed by its value, and any percentage daily value (DV) is given in parentheses where applicable.
- Express all nutrient information relative to the entire product, not per serving or per 100g.";

const ASSESSMENT_INSTRUCTIONS: &str = "\
You will be given data about a product and a user's dietary preferences.
Decide whether the product is good or bad for this user and support the decision with reasons.
Keep the analysis clear and concise, address the user as \"you\" and make it personalised.
Return JSON of the form {\"analysis\": [\"...\", \"...\"]}.";

const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_HARASSMENT",
];

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("model API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("model returned no text")]
    EmptyResponse,
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────────────

pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, GeminiError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// Describe the product shown in `assets`. Never fails: problems are
    /// reported inside the returned text.
    pub async fn analyze_images(&self, assets: &[ImageAsset]) -> String {
        if assets.is_empty() {
            return NO_IMAGES_DOWNLOADED.to_string();
        }

        let mut parts: Vec<Value> = assets.iter().filter_map(image_part).collect();
        if parts.is_empty() {
            warn!("none of {} payloads decoded as an image", assets.len());
            return NO_VALID_IMAGES.to_string();
        }
        let downloaded = assets.iter().filter(|a| a.validated).count();
        debug!("analyzing {} images ({} downloaded)", parts.len(), downloaded);
        parts.push(json!({ "text": ANALYSIS_PROMPT }));

        let body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "temperature": 1.0,
                "topP": 0.95,
                "topK": 64,
                "maxOutputTokens": 1000,
            },
            "safetySettings": safety_settings(),
        });

        match self.generate(&body).await {
            Ok(text) => text,
            Err(e) => {
                warn!("image analysis failed: {}", e);
                format!("An error occurred during image analysis: {}", e)
            }
        }
    }

    /// Merge page text and image analysis into a structured record.
    pub async fn synthesize(&self, page_text: Option<&str>, analysis: &str) -> ProductRecord {
        let prompt = format!(
            "Generate a JSON product description from the following:\n\n\
             **Product Description (Markdown):**\n```markdown\n{}\n```\n\n\
             **Image Analysis Output (Markdown):**\n```markdown\n{}\n```",
            page_text.unwrap_or("Not available"),
            analysis
        );

        let body = json!({
            "systemInstruction": { "parts": [{ "text": SYNTHESIS_INSTRUCTIONS }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": 0.9,
                "topP": 0.95,
                "topK": 64,
                "maxOutputTokens": 1000,
                "responseMimeType": "application/json",
                "responseSchema": product_schema(),
            },
            "safetySettings": safety_settings(),
        });

        match self.generate(&body).await {
            Ok(text) => match serde_json::from_str::<StructuredProduct>(strip_code_fence(&text)) {
                Ok(product) => ProductRecord::Product(product),
                Err(e) => {
                    warn!("error parsing JSON: {}", e);
                    ProductRecord::failed(PARSE_FAILURE)
                }
            },
            Err(e) => {
                warn!("structured data generation failed: {}", e);
                ProductRecord::failed(format!(
                    "An error occurred during structured data generation: {}",
                    e
                ))
            }
        }
    }

    /// Judge a product against free-text dietary preferences.
    pub async fn assess_for_user(&self, product: &StructuredProduct, preferences: &str) -> Assessment {
        let product_json = serde_json::to_string_pretty(product).unwrap_or_default();
        let prompt = format!(
            "Data to analyze:\n\nProduct:\n{}\n\nUser preferences:\n{}",
            product_json, preferences
        );

        let body = json!({
            "systemInstruction": { "parts": [{ "text": ASSESSMENT_INSTRUCTIONS }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": 1.0,
                "maxOutputTokens": 1000,
                "responseMimeType": "application/json",
            },
            "safetySettings": safety_settings(),
        });

        match self.generate(&body).await {
            Ok(text) => match serde_json::from_str::<Value>(strip_code_fence(&text)) {
                Ok(Value::Object(mut map)) => match map.remove("analysis") {
                    Some(Value::Array(items)) => Assessment::Points {
                        analysis: items
                            .into_iter()
                            .map(|item| match item {
                                Value::String(s) => s,
                                other => other.to_string(),
                            })
                            .collect(),
                    },
                    _ => Assessment::Failed {
                        error: PARSE_FAILURE.to_string(),
                    },
                },
                _ => Assessment::Failed {
                    error: PARSE_FAILURE.to_string(),
                },
            },
            Err(e) => Assessment::Failed {
                error: format!("An error occurred during product analysis: {}", e),
            },
        }
    }

    async fn generate(&self, body: &Value) -> Result<String, GeminiError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GeminiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(GeminiError::EmptyResponse);
        }
        Ok(text)
    }
}

// ── Request helpers ──────────────────────────────────────────────────────────

/// Inline image part, or `None` when the payload does not decode.
fn image_part(asset: &ImageAsset) -> Option<Value> {
    let format = match decode_image(&asset.bytes) {
        Ok(format) => format,
        Err(e) => {
            debug!("skipping {}: {}", asset.source_link, e);
            return None;
        }
    };

    Some(json!({
        "inlineData": {
            "mimeType": format.to_mime_type(),
            "data": BASE64.encode(&asset.bytes),
        }
    }))
}

fn safety_settings() -> Value {
    Value::Array(
        SAFETY_CATEGORIES
            .iter()
            .map(|category| json!({ "category": category, "threshold": "BLOCK_NONE" }))
            .collect(),
    )
}

fn product_schema() -> Value {
    let string = json!({ "type": "STRING" });
    json!({
        "type": "OBJECT",
        "properties": {
            "product_name": string,
            "ingredients": string,
            "nutritional_information": string,
            "product_details": {
                "type": "OBJECT",
                "properties": {
                    "brand_name": string,
                    "weight": string,
                    "category": {
                        "type": "OBJECT",
                        "properties": {
                            "purpose": string,
                            "frequency": string,
                        },
                    },
                },
            },
            "claims": string,
        },
    })
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
