use once_cell::sync::Lazy;
use regex::Regex;

use super::{clip_between, EndSearch, PageExtractor, ScrapeResult};

const BODY_START_MARKER: &str = "No Question asked";
const BODY_END_MARKER: &str = "## Rating and Reviews";

/// Gallery images are published as `<id>-<n>_<rest>` for n in 1..=9.
const GALLERY_SIZE: usize = 9;

static BASE_IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https://www\.bigbasket\.com/media/uploads/[^)\s"]+\.(?:jpg|jpeg)"#).unwrap()
});

pub(super) struct BigBasketExtractor;

impl PageExtractor for BigBasketExtractor {
    fn extract(&self, raw_text: &str) -> ScrapeResult {
        let image_links = BASE_IMAGE_RE
            .find_iter(raw_text)
            .flat_map(|m| expand_bigbasket_link(m.as_str()))
            .collect();

        let cleaned_text = clip_between(
            raw_text,
            BODY_START_MARKER,
            BODY_END_MARKER,
            EndSearch::AfterStartMarker,
        )
        .to_string();

        // Candidates are unverified; the primary image is picked after probing.
        ScrapeResult {
            cleaned_text,
            image_links,
            primary_image_url: None,
        }
    }

    fn needs_probe(&self) -> bool {
        true
    }
}

/// Expand a gallery base link into its numbered variants by splitting at the
/// last underscore. A link without an underscore is returned as-is.
pub fn expand_bigbasket_link(link: &str) -> Vec<String> {
    match link.rsplit_once('_') {
        Some((prefix, suffix)) => (1..=GALLERY_SIZE)
            .map(|n| format!("{}-{}_{}", prefix, n, suffix))
            .collect(),
        None => vec![link.to_string()],
    }
}
