use log::debug;
use reqwest::blocking::Client;
use reqwest::Proxy;

use crate::config::ScraperConfig;
use crate::models::FormState;
use crate::utils::{Deadline, ScraperError};

/// Network session bound to one query: cookies, proxy and headers live here
/// so session tokens stay valid from the form fetch through the final POST.
pub trait Session {
    /// GET `url`, returning the raw body.
    fn get(&mut self, url: &str, deadline: &Deadline) -> Result<Vec<u8>, ScraperError>;

    /// POST `form` url-encoded to `url`, returning the decoded body.
    fn post_form(
        &mut self,
        url: &str,
        form: &FormState,
        deadline: &Deadline,
    ) -> Result<String, ScraperError>;
}

/// Decode a response body as UTF-8, dropping a leading byte-order mark.
pub fn decode_body(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

pub struct HttpSession {
    client: Client,
    timeout: std::time::Duration,
}

impl HttpSession {
    pub fn new(config: &ScraperConfig) -> Result<Self, ScraperError> {
        let mut builder = Client::builder()
            .cookie_store(true)
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout);

        if let Some(proxy_config) = &config.proxy {
            let mut proxy = Proxy::all(proxy_config.url())
                .map_err(|e| ScraperError::Config(format!("Invalid proxy: {}", e)))?;
            if let Some(username) = &proxy_config.username {
                proxy = proxy.basic_auth(username, proxy_config.password.as_deref().unwrap_or(""));
            }
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ScraperError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(HttpSession {
            client,
            timeout: config.request_timeout,
        })
    }
}

impl Session for HttpSession {
    fn get(&mut self, url: &str, deadline: &Deadline) -> Result<Vec<u8>, ScraperError> {
        deadline.check()?;
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .timeout(deadline.clamp(self.timeout))
            .send()?
            .error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }

    fn post_form(
        &mut self,
        url: &str,
        form: &FormState,
        deadline: &Deadline,
    ) -> Result<String, ScraperError> {
        deadline.check()?;
        debug!("POST {} with fields {:?}", url, form.names());
        let response = self
            .client
            .post(url)
            .form(form)
            .timeout(deadline.clamp(self.timeout))
            .send()?
            .error_for_status()?;
        Ok(decode_body(&response.bytes()?))
    }
}
