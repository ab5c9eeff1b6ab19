use once_cell::sync::Lazy;
use regex::Regex;

use super::{clip_between, EndSearch, PageExtractor, ScrapeResult};

const BODY_START_MARKER: &str = "My Cart";
const BODY_END_MARKER: &str = "Disclaimer";
const CDN_DOMAIN: &str = "cdn.grofers.com";
const CANONICAL_IMAGE_PREFIX: &str = "https://cdn.grofers.com/app/";
const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp"];

/// Number of links dropped from the end of the discovered list. The page
/// footer carries decorative banners after the product gallery.
pub const TRAILING_DECORATIVE_LINKS: usize = 2;

static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#+\s").unwrap());

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s)"]+"#).unwrap());

static HOST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://([^/?#\s]+)").unwrap());

// Resizing options plus the bucket segment, e.g. `cdn-cgi/image/f=auto,w=480/app/`.
static TRANSFORM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://cdn\.grofers\.com/cdn-cgi/image/[^/]+/[^/]+/").unwrap()
});

static EXTENSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(?:jpe?g|png|webp)").unwrap());

pub(super) struct BlinkitExtractor;

impl PageExtractor for BlinkitExtractor {
    fn extract(&self, raw_text: &str) -> ScrapeResult {
        let header = raw_text
            .lines()
            .find(|line| HEADING_RE.is_match(line))
            .map(str::trim);

        let body = clip_between(raw_text, BODY_START_MARKER, BODY_END_MARKER, EndSearch::FromStart);
        let cleaned_text = match header {
            Some(header) => format!("{}\n{}", header, body),
            None => body.to_string(),
        };

        let mut image_links = find_image_links(&cleaned_text);
        if image_links.len() >= TRAILING_DECORATIVE_LINKS {
            image_links.truncate(image_links.len() - TRAILING_DECORATIVE_LINKS);
        }

        ScrapeResult {
            primary_image_url: image_links.first().cloned(),
            cleaned_text,
            image_links,
        }
    }
}

fn find_image_links(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let mut links = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        for found in URL_RE.find_iter(line) {
            let mut link = found.as_str().to_string();
            if !is_cdn_link(&link) {
                continue;
            }

            // The renderer wraps long URLs onto the following line.
            if !has_image_extension(&link) {
                if let Some(next) = lines.get(idx + 1) {
                    if !next.contains(CDN_DOMAIN) {
                        link.push_str(next.trim());
                    }
                }
            }

            links.push(canonicalize_link(&link));
        }
    }
    links
}

fn is_cdn_link(link: &str) -> bool {
    HOST_RE
        .captures(link)
        .map(|cap| {
            let host = cap[1].to_lowercase();
            host == CDN_DOMAIN || host.ends_with(&format!(".{}", CDN_DOMAIN))
        })
        .unwrap_or(false)
}

fn has_image_extension(link: &str) -> bool {
    let lower = link.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn canonicalize_link(link: &str) -> String {
    let rewritten = TRANSFORM_RE.replace(link, CANONICAL_IMAGE_PREFIX).replace('\\', "");
    match EXTENSION_RE.find(&rewritten) {
        Some(ext) => rewritten[..ext.end()].to_string(),
        None => rewritten,
    }
}
