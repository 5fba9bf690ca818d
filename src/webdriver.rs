use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{DriveError, Result};

/// W3C element identifier key in find-element replies.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Browsers the grid knows how to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Browser {
    Chrome,
    Firefox,
    Edge,
}

impl Browser {
    pub fn name(&self) -> &'static str {
        match self {
            Browser::Chrome => "chrome",
            Browser::Firefox => "firefox",
            Browser::Edge => "MicrosoftEdge",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = DriveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "chrome" => Ok(Browser::Chrome),
            "firefox" => Ok(Browser::Firefox),
            "edge" | "microsoftedge" => Ok(Browser::Edge),
            other => Err(DriveError::WebDriver(format!("unknown browser '{other}'"))),
        }
    }
}

/// Minimal WebDriver wire client, enough to drive the login flows.
/// Talks to a local driver or a grid; the endpoint comes from
/// `SELENIUM_DRIVER_SERVICE` (default `http://localhost:4444`).
#[derive(Clone)]
pub struct WebDriver {
    http: Client,
    base: String,
}

/// Reference to a located element within a session.
#[derive(Debug, Clone)]
pub struct Element {
    id: String,
}

pub struct Session {
    driver: WebDriver,
    id: String,
}

impl WebDriver {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        let base = endpoint.into().trim_end_matches('/').to_string();
        Ok(Self { http, base })
    }

    /// Endpoint from `SELENIUM_DRIVER_SERVICE`, falling back to a local
    /// selenium server.
    pub fn from_env(timeout: Duration) -> Result<Self> {
        let endpoint = std::env::var("SELENIUM_DRIVER_SERVICE")
            .unwrap_or_else(|_| "http://localhost:4444".to_string());
        Self::new(endpoint, timeout)
    }

    pub async fn new_session(&self, browser: Browser, headless: bool) -> Result<Session> {
        let mut always_match = json!({ "browserName": browser.name() });
        if headless {
            match browser {
                Browser::Chrome | Browser::Edge => {
                    always_match["goog:chromeOptions"] = json!({ "args": ["--headless=new"] });
                }
                Browser::Firefox => {
                    always_match["moz:firefoxOptions"] = json!({ "args": ["-headless"] });
                }
            }
        }
        let body = json!({ "capabilities": { "alwaysMatch": always_match } });
        let value = self.post(&format!("{}/session", self.base), &body).await?;
        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DriveError::WebDriver("session reply carries no sessionId".to_string())
            })?
            .to_string();
        info!("WebDriver session {} started ({})", id, browser.name());
        Ok(Session {
            driver: self.clone(),
            id,
        })
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value> {
        let response = self.http.post(url).json(body).send().await?;
        Self::unwrap_value(url, response).await
    }

    async fn get(&self, url: &str) -> Result<Value> {
        let response = self.http.get(url).send().await?;
        Self::unwrap_value(url, response).await
    }

    async fn delete(&self, url: &str) -> Result<Value> {
        let response = self.http.delete(url).send().await?;
        Self::unwrap_value(url, response).await
    }

    /// Every WebDriver reply wraps its payload in `{"value": …}`; error
    /// replies put `error` and `message` inside the value.
    async fn unwrap_value(url: &str, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| DriveError::WebDriver(format!("{url}: {e}")))?;
        let value = body.get("value").cloned().unwrap_or(Value::Null);
        if !status.is_success() {
            let error = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(DriveError::WebDriver(format!(
                "{url}: {status} {error}: {message}"
            )));
        }
        Ok(value)
    }
}

impl Session {
    fn url(&self, suffix: &str) -> String {
        format!("{}/session/{}{}", self.driver.base, self.id, suffix)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn navigate(&self, page: &str) -> Result<()> {
        debug!("Navigating to {}", page);
        self.driver
            .post(&self.url("/url"), &json!({ "url": page }))
            .await?;
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String> {
        let value = self.driver.get(&self.url("/url")).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DriveError::WebDriver("current url is not a string".to_string()))
    }

    pub async fn title(&self) -> Result<String> {
        let value = self.driver.get(&self.url("/title")).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn find_element(&self, css: &str) -> Result<Element> {
        let value = self
            .driver
            .post(
                &self.url("/element"),
                &json!({ "using": "css selector", "value": css }),
            )
            .await?;
        let id = value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DriveError::WebDriver(format!("no element reference for selector '{css}'"))
            })?
            .to_string();
        Ok(Element { id })
    }

    /// Polls for an element until `deadline` elapses, probing every
    /// 500 ms. The UI flows are a chain of these waits.
    pub async fn wait_for_element(&self, css: &str, deadline: Duration) -> Result<Element> {
        let start = tokio::time::Instant::now();
        loop {
            match self.find_element(css).await {
                Ok(element) => return Ok(element),
                Err(_) if start.elapsed() < deadline => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Err(e) => {
                    return Err(DriveError::WebDriver(format!(
                        "element '{css}' did not appear within {}s: {e}",
                        deadline.as_secs()
                    )))
                }
            }
        }
    }

    pub async fn click(&self, element: &Element) -> Result<()> {
        self.driver
            .post(
                &self.url(&format!("/element/{}/click", element.id)),
                &json!({}),
            )
            .await?;
        Ok(())
    }

    pub async fn send_keys(&self, element: &Element, text: &str) -> Result<()> {
        self.driver
            .post(
                &self.url(&format!("/element/{}/value", element.id)),
                &json!({ "text": text }),
            )
            .await?;
        Ok(())
    }

    pub async fn quit(self) -> Result<()> {
        self.driver.delete(&self.url("")).await?;
        debug!("WebDriver session {} closed", self.id);
        Ok(())
    }
}
