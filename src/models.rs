use serde::{Deserialize, Deserializer, Serialize};

// ── Transport shapes ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub url: Option<String>,
    /// Base64-encoded image payloads.
    pub images: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct AssessRequest {
    pub product: StructuredProduct,
    pub preferences: String,
}

// ── Pipeline data ────────────────────────────────────────────────────────────

/// A downloaded (or uploaded) image, alive only for one request.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub source_link: String,
    pub bytes: Vec<u8>,
    /// Set once the payload has been decoded as an image. Uploads are
    /// decoded later, by the analyzer.
    pub validated: bool,
}

impl ImageAsset {
    pub fn uploaded(index: usize, bytes: Vec<u8>) -> Self {
        Self {
            source_link: format!("upload:{}", index),
            bytes,
            validated: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredProduct {
    #[serde(deserialize_with = "null_as_empty")]
    pub product_name: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub ingredients: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub nutritional_information: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub claims: String,
    pub product_details: ProductDetails,
    pub product_image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductDetails {
    #[serde(deserialize_with = "null_as_empty")]
    pub brand_name: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub weight: String,
    pub category: Category,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Category {
    #[serde(deserialize_with = "null_as_empty")]
    pub purpose: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub frequency: String,
}

/// Model output sometimes carries `null` for text it could not find.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Terminal artifact of a pipeline run. `Failed` is a normal outcome
/// carrying the reason in its `error` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProductRecord {
    Failed {
        error: String,
        product_image_url: Option<String>,
    },
    Product(StructuredProduct),
}

impl ProductRecord {
    pub fn failed(error: impl Into<String>) -> Self {
        ProductRecord::Failed {
            error: error.into(),
            product_image_url: None,
        }
    }

    pub fn set_image_url(&mut self, url: Option<String>) {
        match self {
            ProductRecord::Failed {
                product_image_url, ..
            } => *product_image_url = url,
            ProductRecord::Product(product) => product.product_image_url = url,
        }
    }
}

/// Personalised verdict for a product against a user's preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Assessment {
    Failed { error: String },
    Points { analysis: Vec<String> },
}
