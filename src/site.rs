use url::Url;

use crate::pipeline::PipelineError;

/// Supported storefronts, each with its own page layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteVariant {
    Blinkit,
    BigBasket,
    Instamart,
}

/// Domain needles checked in order against the URL host.
const SITE_TABLE: &[(&str, SiteVariant)] = &[
    ("blinkit", SiteVariant::Blinkit),
    ("swiggy.com", SiteVariant::Instamart),
    ("bigbasket.com", SiteVariant::BigBasket),
];

impl SiteVariant {
    pub fn name(self) -> &'static str {
        match self {
            SiteVariant::Blinkit => "blinkit",
            SiteVariant::BigBasket => "bigbasket",
            SiteVariant::Instamart => "instamart",
        }
    }
}

/// Parse `url` and pick its storefront. The parsed URL is handed back so
/// callers do not parse it again.
pub fn classify(url: &str) -> Result<(SiteVariant, Url), PipelineError> {
    let parsed = Url::parse(url).map_err(|_| PipelineError::InvalidUrl(url.to_string()))?;
    let host = parsed.host_str().unwrap_or("").to_lowercase();

    match SITE_TABLE.iter().find(|(needle, _)| host.contains(needle)) {
        Some((_, variant)) => Ok((*variant, parsed)),
        None => Err(PipelineError::UnsupportedSite { domain: host }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_domains() {
        assert_eq!(
            classify("https://blinkit.com/prn/oats/prid/12345").unwrap().0,
            SiteVariant::Blinkit
        );
        assert_eq!(
            classify("https://www.swiggy.com/instamart/item/PP8VVOYNES").unwrap().0,
            SiteVariant::Instamart
        );
        assert_eq!(
            classify("https://www.bigbasket.com/pd/40000001/juice").unwrap().0,
            SiteVariant::BigBasket
        );
    }

    #[test]
    fn test_host_case_ignored() {
        let (variant, url) = classify("https://WWW.BigBasket.com/pd/1").unwrap();
        assert_eq!(variant, SiteVariant::BigBasket);
        assert_eq!(url.host_str(), Some("www.bigbasket.com"));
    }

    #[test]
    fn test_unknown_domain_rejected() {
        let err = classify("https://www.amazon.in/dp/B000").unwrap_err();
        match err {
            PipelineError::UnsupportedSite { domain } => assert_eq!(domain, "www.amazon.in"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_domain_only_matched_on_host() {
        assert!(matches!(
            classify("https://example.com/blinkit/bigbasket.com"),
            Err(PipelineError::UnsupportedSite { .. })
        ));
    }

    #[test]
    fn test_malformed_url() {
        assert!(matches!(
            classify("not a url"),
            Err(PipelineError::InvalidUrl(_))
        ));
    }
}
