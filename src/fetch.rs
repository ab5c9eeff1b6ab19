use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use reqwest::redirect::Policy;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::models::ImageAsset;
use crate::render::html_to_markdown;

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) nutri-scan-api/0.1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REDIRECTS: usize = 10;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("{0}")]
    Request(String),
    #[error("upstream returned status {0}")]
    Upstream(u16),
    #[error("URL did not return HTML")]
    NotHtml,
    #[error("payload is not a decodable image: {0}")]
    Image(#[from] image::ImageError),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Request(format!("TimeoutError: {}", e))
        } else if e.is_connect() {
            FetchError::Request(format!("ConnectError: {}", e))
        } else {
            FetchError::Request(format!("RequestError: {}", e))
        }
    }
}

fn build_client(timeout: Duration, insecure: bool) -> Result<Client, FetchError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

    let mut builder = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout)
        .redirect(Policy::limited(MAX_REDIRECTS))
        .user_agent(USER_AGENT)
        .default_headers(headers);

    if insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build().map_err(|e| FetchError::Client(e.to_string()))
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase()
}

/// Sniff the format of `bytes` and decode them fully.
pub fn decode_image(bytes: &[u8]) -> Result<image::ImageFormat, image::ImageError> {
    let format = image::guess_format(bytes)?;
    image::load_from_memory_with_format(bytes, format)?;
    Ok(format)
}

// ── Page fetcher ─────────────────────────────────────────────────────────────

/// Produces the page text the extractors work on.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

pub struct HttpPageFetcher {
    client: Client,
    renderer_url: Option<String>,
}

impl HttpPageFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: build_client(config.page_timeout, config.insecure_ssl)?,
            renderer_url: config.renderer_url.clone(),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        if let Some(renderer) = &self.renderer_url {
            let response = self.client.get(format!("{}{}", renderer, url)).send().await?;
            if !response.status().is_success() {
                return Err(FetchError::Upstream(response.status().as_u16()));
            }
            return Ok(response.text().await?);
        }

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Upstream(response.status().as_u16()));
        }
        if !content_type(response.headers()).contains("text/html") {
            return Err(FetchError::NotHtml);
        }

        let html = response.text().await?;
        Ok(html_to_markdown(&html, url))
    }
}

// ── Link validation and download ─────────────────────────────────────────────

/// Existence check for guessed image links.
#[async_trait]
pub trait LinkProbe: Send + Sync {
    /// Keep the links that answer, in input order.
    async fn probe_links(&self, links: &[String]) -> Vec<String>;
}

/// Bounded fan-out over candidate image links. Every call gets its own
/// stream; nothing is shared between requests except the connection pools.
pub struct Downloader {
    probe_client: Client,
    download_client: Client,
    probe_concurrency: usize,
    download_concurrency: usize,
}

impl Downloader {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        Ok(Self {
            probe_client: build_client(config.probe_timeout, config.insecure_ssl)?,
            download_client: build_client(config.download_timeout, config.insecure_ssl)?,
            probe_concurrency: config.probe_concurrency,
            download_concurrency: config.download_concurrency,
        })
    }

    async fn probe(&self, link: &str) -> Option<String> {
        match self.probe_client.head(link).send().await {
            Ok(response) if response.status().is_success() => Some(link.to_string()),
            Ok(response) => {
                debug!("probe {} -> {}", link, response.status());
                None
            }
            Err(e) => {
                debug!("probe {} failed: {}", link, e);
                None
            }
        }
    }

    /// Download every link that serves a decodable image. Failed links are
    /// dropped; the result keeps the input order.
    pub async fn download_images(&self, links: &[String]) -> Vec<ImageAsset> {
        let downloads: Vec<_> = links
            .iter()
            .enumerate()
            .map(|(index, link)| self.download(index, link))
            .collect();
        let results: Vec<Option<ImageAsset>> = stream::iter(downloads)
            .buffered(self.download_concurrency)
            .collect()
            .await;

        let assets: Vec<ImageAsset> = results.into_iter().flatten().collect();
        info!("downloaded {} of {} images", assets.len(), links.len());
        assets
    }

    async fn download(&self, index: usize, link: &str) -> Option<ImageAsset> {
        match self.try_download(link).await {
            Ok(bytes) => Some(ImageAsset {
                source_link: link.to_string(),
                bytes,
                validated: true,
            }),
            Err(e) => {
                warn!("error downloading image {} from {}: {}", index, link, e);
                None
            }
        }
    }

    async fn try_download(&self, link: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.download_client.get(link).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Upstream(response.status().as_u16()));
        }
        let kind = content_type(response.headers());
        if !kind.contains("image") {
            return Err(FetchError::Request(format!("not an image: {:?}", kind)));
        }
        let bytes = response.bytes().await?.to_vec();
        let format = decode_image(&bytes)?;
        debug!("{} decoded as {:?}", link, format);
        Ok(bytes)
    }
}

#[async_trait]
impl LinkProbe for Downloader {
    /// HEAD every link; 2xx answers survive.
    async fn probe_links(&self, links: &[String]) -> Vec<String> {
        let probes: Vec<_> = links.iter().map(|link| self.probe(link)).collect();
        let results: Vec<Option<String>> = stream::iter(probes)
            .buffered(self.probe_concurrency)
            .collect()
            .await;

        let valid: Vec<String> = results.into_iter().flatten().collect();
        debug!("{} of {} probed links exist", valid.len(), links.len());
        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> FetchConfig {
        FetchConfig {
            probe_timeout: Duration::from_secs(2),
            download_timeout: Duration::from_secs(2),
            probe_concurrency: 3,
            download_concurrency: 2,
            ..FetchConfig::default()
        }
    }

    fn image(server: &MockServer, name: &str) -> String {
        format!("{}/img/{}", server.uri(), name)
    }

    fn png(width: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(image::RgbImage::new(width, 1))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn test_download_keeps_only_images_in_order() {
        let server = MockServer::start().await;
        for (name, width) in [("a.jpg", 1), ("c.jpg", 3)] {
            Mock::given(method("GET"))
                .and(path(format!("/img/{}", name)))
                .respond_with(ResponseTemplate::new(200).set_body_raw(png(width), "image/jpeg"))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/img/page.jpg"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/gone.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let downloader = Downloader::new(&test_config()).unwrap();
        let links = vec![
            image(&server, "gone.jpg"),
            image(&server, "c.jpg"),
            image(&server, "page.jpg"),
            image(&server, "a.jpg"),
        ];
        let assets = downloader.download_images(&links).await;

        let sources: Vec<&str> = assets.iter().map(|a| a.source_link.as_str()).collect();
        assert_eq!(sources, vec![links[1].as_str(), links[3].as_str()]);
        assert_eq!(assets[0].bytes, png(3));
        assert!(assets.iter().all(|a| a.validated));
    }

    #[tokio::test]
    async fn test_download_drops_undecodable_payloads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/broken.jpg"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"not an image at all".to_vec(), "image/jpeg"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/front.png"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(png(2), "image/png"))
            .mount(&server)
            .await;

        let downloader = Downloader::new(&test_config()).unwrap();
        let links = vec![image(&server, "broken.jpg"), image(&server, "front.png")];
        let assets = downloader.download_images(&links).await;
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].source_link, links[1]);
    }

    #[test]
    fn test_decode_image() {
        assert_eq!(decode_image(&png(1)).unwrap(), image::ImageFormat::Png);
        assert!(decode_image(b"GIF89a truncated").is_err());
        assert!(decode_image(b"plain text").is_err());
    }

    #[tokio::test]
    async fn test_download_tolerates_unreachable_hosts() {
        let downloader = Downloader::new(&test_config()).unwrap();
        let assets = downloader
            .download_images(&["http://127.0.0.1:1/none.jpg".to_string()])
            .await;
        assert!(assets.is_empty());
    }

    #[tokio::test]
    async fn test_download_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/slow.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(Vec::<u8>::new(), "image/jpeg")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let config = FetchConfig {
            download_timeout: Duration::from_millis(200),
            ..test_config()
        };
        let downloader = Downloader::new(&config).unwrap();
        let assets = downloader
            .download_images(&[image(&server, "slow.jpg")])
            .await;
        assert!(assets.is_empty());
    }

    #[tokio::test]
    async fn test_probe_filters_missing_variants() {
        let server = MockServer::start().await;
        for n in [2, 5] {
            Mock::given(method("HEAD"))
                .and(path(format!("/img/100-{}_200.jpg", n)))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server)
                .await;
        }
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let downloader = Downloader::new(&test_config()).unwrap();
        let candidates =
            crate::extract::bigbasket::expand_bigbasket_link(&image(&server, "100_200.jpg"));
        let valid = downloader.probe_links(&candidates).await;
        assert_eq!(
            valid,
            vec![
                image(&server, "100-2_200.jpg"),
                image(&server, "100-5_200.jpg"),
            ]
        );
    }

    #[tokio::test]
    async fn test_page_fetch_renders_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prn/oats"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(
                    "<body><h1>Oats</h1><p>My Cart</p></body>",
                    "text/html; charset=utf-8",
                ),
            )
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new(&test_config()).unwrap();
        let text = fetcher
            .fetch(&format!("{}/prn/oats", server.uri()))
            .await
            .unwrap();
        assert!(text.starts_with("# Oats"));
        assert!(text.contains("My Cart"));
    }

    #[tokio::test]
    async fn test_page_fetch_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("{}", "application/json"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new(&test_config()).unwrap();
        assert!(matches!(
            fetcher.fetch(&format!("{}/missing", server.uri())).await,
            Err(FetchError::Upstream(503))
        ));
        assert!(matches!(
            fetcher.fetch(&format!("{}/json", server.uri())).await,
            Err(FetchError::NotHtml)
        ));
    }

    #[tokio::test]
    async fn test_renderer_mode_returns_text_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/render/https://blinkit.com/prn/oats"))
            .respond_with(ResponseTemplate::new(200).set_body_string("# Oats\nMy Cart"))
            .mount(&server)
            .await;

        let config = FetchConfig {
            renderer_url: Some(format!("{}/render/", server.uri())),
            ..test_config()
        };
        let fetcher = HttpPageFetcher::new(&config).unwrap();
        let text = fetcher.fetch("https://blinkit.com/prn/oats").await.unwrap();
        assert_eq!(text, "# Oats\nMy Cart");
    }
}
