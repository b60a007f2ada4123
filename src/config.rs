use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::utils::ScraperError;

pub const DEFAULT_BASE_URL: &str = "https://www.pagafacil.gob.mx/pagafacilv2/epago/cv/";
pub const DEFAULT_FORM_PATH: &str = "control_vehicular_25.php";
pub const DEFAULT_CAPTCHA_ENDPOINT: &str =
    "https://www.pagafacil.gob.mx/pagafacilv2/captcha/imagebuilder.php";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Proxy URL without credentials; those are attached as basic auth.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub base_url: String,
    pub form_path: String,
    /// Absolute URL used whenever the page references the known captcha builder.
    pub captcha_endpoint: String,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub captcha_timeout: Duration,
    pub proxy: Option<ProxyConfig>,
    /// Full form fetch, captcha solve and submit cycles.
    pub outer_retry: RetryPolicy,
    /// OCR solving retries inside one outer attempt.
    pub inner_retry: RetryPolicy,
    pub min_captcha_len: usize,
    /// When set, raw captchas and candidate bitmaps are dumped here.
    pub debug_dir: Option<PathBuf>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        ScraperConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            form_path: DEFAULT_FORM_PATH.to_string(),
            captcha_endpoint: DEFAULT_CAPTCHA_ENDPOINT.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(30),
            captcha_timeout: Duration::from_secs(15),
            proxy: None,
            outer_retry: RetryPolicy::new(3, Duration::from_secs(2)),
            inner_retry: RetryPolicy::new(2, Duration::from_secs(1)),
            min_captcha_len: 4,
            debug_dir: None,
        }
    }
}

impl ScraperConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ScraperError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ScraperError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ScraperConfig::default();

        if let Some(base_url) = lookup("BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(form_path) = lookup("FORM_URL") {
            config.form_path = form_path;
        }
        if let Some(secs) = lookup("REQUEST_TIMEOUT") {
            config.request_timeout = Duration::from_secs(parse_number("REQUEST_TIMEOUT", &secs)?);
        }
        if let Some(attempts) = lookup("MAX_RETRY_ATTEMPTS") {
            let attempts = parse_number("MAX_RETRY_ATTEMPTS", &attempts)? as u32;
            config.outer_retry = RetryPolicy::new(attempts, config.outer_retry.delay);
        }
        if let Some(attempts) = lookup("CAPTCHA_MAX_ATTEMPTS") {
            let attempts = parse_number("CAPTCHA_MAX_ATTEMPTS", &attempts)? as u32;
            config.inner_retry = RetryPolicy::new(attempts, config.inner_retry.delay);
        }

        // Proxy is only enabled when both host and port are known
        if let (Some(host), Some(port)) = (lookup("PROXY_HOST"), lookup("PROXY_PORT")) {
            let port = port
                .trim()
                .parse::<u16>()
                .map_err(|e| ScraperError::Config(format!("PROXY_PORT: {}", e)))?;
            config.proxy = Some(ProxyConfig {
                host,
                port,
                username: lookup("PROXY_USERNAME"),
                password: lookup("PROXY_PASSWORD"),
            });
        }

        Ok(config)
    }

    /// Absolute URL of the query form.
    pub fn form_url(&self) -> Result<url::Url, ScraperError> {
        let base = url::Url::parse(&self.base_url)
            .map_err(|e| ScraperError::Config(format!("BASE_URL: {}", e)))?;
        base.join(&self.form_path)
            .map_err(|e| ScraperError::Config(format!("FORM_URL: {}", e)))
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, ScraperError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| ScraperError::Config(format!("{}: {}", key, e)))
}
