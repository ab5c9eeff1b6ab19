//! Storefront-specific page cleaning and image-link discovery.

pub(crate) mod bigbasket;
mod blinkit;

use tracing::{debug, info};

use crate::fetch::LinkProbe;
use crate::site::SiteVariant;

// ── Public result type ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeResult {
    pub cleaned_text: String,
    /// Discovery order; the first entry is the primary product image.
    pub image_links: Vec<String>,
    pub primary_image_url: Option<String>,
}

// ── Extractor interface ──────────────────────────────────────────────────────

/// Per-storefront extraction rules. `extract` is pure: the same page text
/// always yields the same result.
pub trait PageExtractor: Send + Sync {
    fn extract(&self, raw_text: &str) -> ScrapeResult;

    /// Whether `image_links` are guesses that must be probed before use.
    fn needs_probe(&self) -> bool {
        false
    }
}

/// Placeholder for Instamart, whose pages need a JavaScript renderer.
struct InstamartExtractor;

impl PageExtractor for InstamartExtractor {
    fn extract(&self, _raw_text: &str) -> ScrapeResult {
        ScrapeResult::default()
    }
}

pub fn extractor_for(variant: SiteVariant) -> &'static dyn PageExtractor {
    match variant {
        SiteVariant::Blinkit => &blinkit::BlinkitExtractor,
        SiteVariant::BigBasket => &bigbasket::BigBasketExtractor,
        SiteVariant::Instamart => &InstamartExtractor,
    }
}

/// Extract a page and, for storefronts whose links are guessed, keep only
/// the candidates that answer a probe.
pub async fn scrape(variant: SiteVariant, raw_text: &str, prober: &dyn LinkProbe) -> ScrapeResult {
    let extractor = extractor_for(variant);
    let mut result = extractor.extract(raw_text);

    if extractor.needs_probe() {
        let candidates = std::mem::take(&mut result.image_links);
        debug!("probing {} candidate links", candidates.len());
        result.image_links = prober.probe_links(&candidates).await;
        result.primary_image_url = result.image_links.first().cloned();
    }

    info!(
        "{} page: {} chars of text, {} image links",
        variant.name(),
        result.cleaned_text.len(),
        result.image_links.len()
    );
    result
}

// ── Shared text helpers ──────────────────────────────────────────────────────

/// Where to look for the end marker.
#[derive(Debug, Clone, Copy)]
pub(crate) enum EndSearch {
    FromStart,
    AfterStartMarker,
}

/// Return the text strictly between `start` and `end`. When either marker is
/// missing the whole input is returned unchanged.
pub(crate) fn clip_between<'a>(text: &'a str, start: &str, end: &str, search: EndSearch) -> &'a str {
    let Some(start_idx) = text.find(start) else {
        return text;
    };
    let body_start = start_idx + start.len();
    let end_idx = match search {
        EndSearch::FromStart => text.find(end),
        EndSearch::AfterStartMarker => text[start_idx..].find(end).map(|i| i + start_idx),
    };

    match end_idx {
        Some(end_idx) if end_idx >= body_start => &text[body_start..end_idx],
        Some(_) => "",
        None => text,
    }
}
