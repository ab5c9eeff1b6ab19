use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ── Defaults ─────────────────────────────────────────────────────────────────

const DEFAULT_BIND: &str = "0.0.0.0:8000";
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

// ── Config objects ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub gemini: GeminiConfig,
    pub fetch: FetchConfig,
    pub cache: CacheConfig,
}

/// Credentials and endpoint for the multimodal model.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// When set, pages are fetched as `{renderer_url}{page_url}` and used verbatim.
    pub renderer_url: Option<String>,
    pub insecure_ssl: bool,
    pub page_timeout: Duration,
    pub probe_timeout: Duration,
    pub download_timeout: Duration,
    pub probe_concurrency: usize,
    pub download_concurrency: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    pub dir: Option<PathBuf>,
    /// `None` keeps entries forever.
    pub ttl: Option<Duration>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            renderer_url: None,
            insecure_ssl: false,
            page_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            download_timeout: Duration::from_secs(30),
            probe_concurrency: 10,
            download_concurrency: 8,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = get("GEMINI_API_KEY")
            .or_else(|| get("API_KEY"))
            .ok_or(ConfigError::Missing("GEMINI_API_KEY"))?;

        let gemini = GeminiConfig {
            api_key,
            base_url: get("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            timeout: Duration::from_secs(parse_or(&get, "GEMINI_TIMEOUT_SECS", 120)?),
        };

        let defaults = FetchConfig::default();
        let fetch = FetchConfig {
            renderer_url: get("NUTRI_SCAN_RENDERER_URL"),
            insecure_ssl: get("NUTRI_SCAN_INSECURE_SSL").as_deref() == Some("1"),
            page_timeout: secs_or(&get, "NUTRI_SCAN_PAGE_TIMEOUT_SECS", defaults.page_timeout)?,
            probe_timeout: secs_or(&get, "NUTRI_SCAN_PROBE_TIMEOUT_SECS", defaults.probe_timeout)?,
            download_timeout: secs_or(
                &get,
                "NUTRI_SCAN_DOWNLOAD_TIMEOUT_SECS",
                defaults.download_timeout,
            )?,
            probe_concurrency: positive_or(
                &get,
                "NUTRI_SCAN_PROBE_CONCURRENCY",
                defaults.probe_concurrency,
            )?,
            download_concurrency: positive_or(
                &get,
                "NUTRI_SCAN_DOWNLOAD_CONCURRENCY",
                defaults.download_concurrency,
            )?,
        };

        let ttl = match get("NUTRI_SCAN_CACHE_TTL_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_value("NUTRI_SCAN_CACHE_TTL_SECS", raw)?)),
            None => None,
        };
        let cache = CacheConfig {
            dir: get("NUTRI_SCAN_CACHE_DIR").map(PathBuf::from),
            ttl,
        };

        Ok(Self {
            bind_addr: get("NUTRI_SCAN_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            gemini,
            fetch,
            cache,
        })
    }
}

// ── Parsing helpers ──────────────────────────────────────────────────────────

fn parse_value<T: FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::Invalid { key, value: raw })
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, raw),
        None => Ok(default),
    }
}

fn secs_or<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default.as_secs()).map(Duration::from_secs)
}

fn positive_or<G>(get: &G, key: &'static str, default: usize) -> Result<usize, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, key, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "secret")])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.gemini.model, "gemini-1.5-flash");
        assert_eq!(config.fetch.probe_concurrency, 10);
        assert_eq!(config.fetch.probe_timeout, Duration::from_secs(5));
        assert!(config.cache.dir.is_none());
        assert!(config.cache.ttl.is_none());
    }

    #[test]
    fn test_legacy_api_key_fallback() {
        let config = Config::from_lookup(lookup(&[("API_KEY", "legacy")])).unwrap();
        assert_eq!(config.gemini.api_key, "legacy");
    }

    #[test]
    fn test_missing_api_key() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("GEMINI_API_KEY")));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "k"),
            ("NUTRI_SCAN_CACHE_DIR", "/tmp/products"),
            ("NUTRI_SCAN_CACHE_TTL_SECS", "3600"),
            ("NUTRI_SCAN_DOWNLOAD_CONCURRENCY", "3"),
            ("NUTRI_SCAN_INSECURE_SSL", "1"),
        ]))
        .unwrap();
        assert_eq!(config.cache.dir, Some(PathBuf::from("/tmp/products")));
        assert_eq!(config.cache.ttl, Some(Duration::from_secs(3600)));
        assert_eq!(config.fetch.download_concurrency, 3);
        assert!(config.fetch.insecure_ssl);
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "k"),
            ("NUTRI_SCAN_PROBE_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { key: "NUTRI_SCAN_PROBE_TIMEOUT_SECS", .. }
        ));

        let err = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "k"),
            ("NUTRI_SCAN_PROBE_CONCURRENCY", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
