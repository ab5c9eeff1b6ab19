use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{CacheKey, CacheStore};
use crate::extract::{self, ScrapeResult};
use crate::fetch::{Downloader, FetchError, PageFetcher};
use crate::gemini::{GeminiClient, NO_IMAGES_DOWNLOADED};
use crate::models::{Assessment, ImageAsset, ProductRecord, StructuredProduct};
use crate::site;

// ── Error type ───────────────────────────────────────────────────────────────

/// Failures that abort a request. Everything after the page fetch degrades
/// into the returned record instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Unsupported website domain: {domain}")]
    UnsupportedSite { domain: String },
    #[error("page fetch failed: {0}")]
    PageFetch(#[from] FetchError),
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

pub struct Pipeline {
    fetcher: Arc<dyn PageFetcher>,
    downloader: Downloader,
    model: GeminiClient,
    cache: Arc<dyn CacheStore>,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        downloader: Downloader,
        model: GeminiClient,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            fetcher,
            downloader,
            model,
            cache,
        }
    }

    /// Classify, fetch, extract, download, analyze, synthesize; cached per URL.
    pub async fn process_url(&self, url: &str) -> Result<ProductRecord, PipelineError> {
        let (variant, parsed) = site::classify(url)?;
        let key = CacheKey::for_url(&parsed);

        match self.cache.get(&key).await {
            Ok(Some(product)) => {
                info!("cache hit for {}", url);
                return Ok(ProductRecord::Product(product));
            }
            Ok(None) => {}
            Err(e) => warn!("cache read failed for {}: {}", url, e),
        }

        info!("processing {} as {}", url, variant.name());
        let raw_text = self.fetcher.fetch(url).await?;
        let scrape = extract::scrape(variant, &raw_text, &self.downloader).await;
        Ok(self.complete(url, &key, scrape).await)
    }

    /// Download, analyze and synthesize a scraped page; successful products
    /// are stored under `key`.
    async fn complete(&self, url: &str, key: &CacheKey, scrape: ScrapeResult) -> ProductRecord {
        let assets = self.downloader.download_images(&scrape.image_links).await;
        if assets.is_empty() {
            warn!("no images downloaded for {}", url);
            let mut record = ProductRecord::failed(NO_IMAGES_DOWNLOADED);
            record.set_image_url(scrape.primary_image_url);
            return record;
        }

        let mut record = self
            .analyze_and_synthesize(Some(&scrape.cleaned_text), &assets)
            .await;
        record.set_image_url(scrape.primary_image_url);

        if let ProductRecord::Product(product) = &record {
            if let Err(e) = self.cache.put(key, product).await {
                warn!("cache write failed for {}: {}", url, e);
            }
        }
        record
    }

    /// Build one record from a batch of uploaded images. Nothing is cached.
    pub async fn process_images(&self, images: Vec<Vec<u8>>) -> ProductRecord {
        let assets: Vec<ImageAsset> = images
            .into_iter()
            .enumerate()
            .map(|(index, bytes)| ImageAsset::uploaded(index, bytes))
            .collect();
        info!("processing {} uploaded images", assets.len());

        let mut record = self.analyze_and_synthesize(None, &assets).await;
        record.set_image_url(None);
        record
    }

    pub async fn assess(&self, product: &StructuredProduct, preferences: &str) -> Assessment {
        self.model.assess_for_user(product, preferences).await
    }

    // Synthesis consumes the analysis text, so the two calls run in sequence.
    async fn analyze_and_synthesize(
        &self,
        page_text: Option<&str>,
        assets: &[ImageAsset],
    ) -> ProductRecord {
        let analysis = self.model.analyze_images(assets).await;
        self.model.synthesize(page_text, &analysis).await
    }
}
