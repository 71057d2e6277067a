// Browser layer - one slot is one browser process with one tab
use crate::models::ScrapeError;

use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetTouchEmulationEnabledParams, SetUserAgentOverrideParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::future::Future;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, warn};

/// The operations the portal pipeline needs from a tab.
///
/// Every call suspends until the browser reports back; bounding the wait is
/// the caller's job.
pub trait Tab: Send + Sync + 'static {
    fn goto(&self, url: &str) -> impl Future<Output = Result<(), ScrapeError>> + Send;

    fn url(&self) -> impl Future<Output = Result<String, ScrapeError>> + Send;

    fn content(&self) -> impl Future<Output = Result<String, ScrapeError>> + Send;

    fn clear_input(&self, selector: &str) -> impl Future<Output = Result<(), ScrapeError>> + Send;

    fn type_into(&self, selector: &str, text: &str) -> impl Future<Output = Result<(), ScrapeError>> + Send;

    /// Click and wait until the navigation it triggers has settled.
    fn click_and_wait(&self, selector: &str) -> impl Future<Output = Result<(), ScrapeError>> + Send;

    /// Resolve once an element matches `selector`.
    fn wait_for_selector(&self, selector: &str) -> impl Future<Output = Result<(), ScrapeError>> + Send;

    fn exists(&self, selector: &str) -> impl Future<Output = Result<bool, ScrapeError>> + Send;

    /// Set a `<select>` to `value` and fire its change event.
    fn select_value(&self, selector: &str, value: &str) -> impl Future<Output = Result<(), ScrapeError>> + Send;

    /// Close the tab and its browser process.
    fn close(&self) -> impl Future<Output = Result<(), ScrapeError>> + Send;
}

/// Starts new slots.
pub trait Launcher: Send + Sync + 'static {
    type Tab: Tab;

    /// A fresh browser process with one emulated tab, not navigated yet.
    fn launch(&self) -> impl Future<Output = Result<Self::Tab, ScrapeError>> + Send;
}

// iPhone 6 profile, the mobile grades grid is only rendered for phones
pub struct DeviceProfile {
    pub width: i64,
    pub height: i64,
    pub scale: f64,
    pub user_agent: &'static str,
}

pub const IPHONE_6: DeviceProfile = DeviceProfile {
    width: 375,
    height: 667,
    scale: 2.0,
    user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 11_0 like Mac OS X) AppleWebKit/604.1.38 (KHTML, like Gecko) Version/11.0 Mobile/15A372 Safari/604.1",
};

// Launches headless chromium through chromiumoxide
pub struct ChromeLauncher {
    headless: bool,
}

impl ChromeLauncher {
    pub fn new(headless: bool) -> Self {
        Self { headless }
    }
}

impl Launcher for ChromeLauncher {
    type Tab = ChromeTab;

    async fn launch(&self) -> Result<ChromeTab, ScrapeError> {
        let mode = if self.headless { HeadlessMode::True } else { HeadlessMode::False };
        let config = BrowserConfig::builder()
            .headless_mode(mode)
            .no_sandbox()
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .build()
            .map_err(ScrapeError::BrowserLaunch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::BrowserLaunch(e.to_string()))?;

        // the handler has to be polled for the browser to make progress
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser event error");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScrapeError::BrowserLaunch(e.to_string()))?;

        let tab = ChromeTab {
            page,
            browser: Mutex::new(Some(browser)),
            handler_task,
        };
        tab.emulate(&IPHONE_6).await?;

        Ok(tab)
    }
}

pub struct ChromeTab {
    page: Page,
    browser: Mutex<Option<Browser>>,
    handler_task: JoinHandle<()>,
}

impl ChromeTab {
    async fn emulate(&self, device: &DeviceProfile) -> Result<(), ScrapeError> {
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(device.width)
            .height(device.height)
            .device_scale_factor(device.scale)
            .mobile(true)
            .build()
            .map_err(ScrapeError::BrowserLaunch)?;

        self.page
            .execute(metrics)
            .await
            .map_err(|e| ScrapeError::BrowserLaunch(format!("device metrics: {}", e)))?;
        self.page
            .execute(SetUserAgentOverrideParams::new(device.user_agent))
            .await
            .map_err(|e| ScrapeError::BrowserLaunch(format!("user agent: {}", e)))?;
        self.page
            .execute(SetTouchEmulationEnabledParams::new(true))
            .await
            .map_err(|e| ScrapeError::BrowserLaunch(format!("touch emulation: {}", e)))?;

        Ok(())
    }

    async fn eval(&self, script: String) -> Result<serde_json::Value, ScrapeError> {
        let result = self.page
            .evaluate(script)
            .await
            .map_err(|e| ScrapeError::Script(e.to_string()))?;

        // scripts returning undefined have no value
        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }
}

// Quote a string as a JS literal
fn js_string(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

impl Tab for ChromeTab {
    async fn goto(&self, url: &str) -> Result<(), ScrapeError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| ScrapeError::Navigation(format!("{}: {}", url, e)))?;
        Ok(())
    }

    async fn url(&self) -> Result<String, ScrapeError> {
        self.page
            .url()
            .await
            .map_err(|e| ScrapeError::Navigation(e.to_string()))?
            .ok_or_else(|| ScrapeError::Navigation("tab has no URL".to_string()))
    }

    async fn content(&self) -> Result<String, ScrapeError> {
        self.page.content().await.map_err(|e| ScrapeError::Navigation(e.to_string()))
    }

    async fn clear_input(&self, selector: &str) -> Result<(), ScrapeError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; el.value = ''; return true; }})()",
            sel = js_string(selector)
        );
        match self.eval(script).await? {
            serde_json::Value::Bool(true) => Ok(()),
            _ => Err(ScrapeError::ElementNotFound(selector.to_string())),
        }
    }

    async fn type_into(&self, selector: &str, text: &str) -> Result<(), ScrapeError> {
        let element = self.page
            .find_element(selector)
            .await
            .map_err(|_| ScrapeError::ElementNotFound(selector.to_string()))?;

        element
            .click()
            .await
            .map_err(|e| ScrapeError::Script(e.to_string()))?
            .type_str(text)
            .await
            .map_err(|e| ScrapeError::Script(e.to_string()))?;

        Ok(())
    }

    async fn click_and_wait(&self, selector: &str) -> Result<(), ScrapeError> {
        let element = self.page
            .find_element(selector)
            .await
            .map_err(|_| ScrapeError::ElementNotFound(selector.to_string()))?;

        element.click().await.map_err(|e| ScrapeError::Script(e.to_string()))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| ScrapeError::Navigation(e.to_string()))?;

        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<(), ScrapeError> {
        // resolves on the first DOM mutation that makes the selector match
        let script = format!(
            r#"new Promise(resolve => {{
                const sel = {sel};
                if (document.querySelector(sel)) {{ resolve(true); return; }}
                const observer = new MutationObserver(() => {{
                    if (document.querySelector(sel)) {{ observer.disconnect(); resolve(true); }}
                }});
                observer.observe(document.documentElement, {{ childList: true, subtree: true }});
            }})"#,
            sel = js_string(selector)
        );
        self.eval(script).await?;
        Ok(())
    }

    async fn exists(&self, selector: &str) -> Result<bool, ScrapeError> {
        let script = format!("document.querySelector({}) !== null", js_string(selector));
        Ok(matches!(self.eval(script).await?, serde_json::Value::Bool(true)))
    }

    async fn select_value(&self, selector: &str, value: &str) -> Result<(), ScrapeError> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.value = {value};
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            sel = js_string(selector),
            value = js_string(value)
        );
        match self.eval(script).await? {
            serde_json::Value::Bool(true) => Ok(()),
            _ => Err(ScrapeError::ElementNotFound(selector.to_string())),
        }
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        if let Err(e) = self.page.clone().close().await {
            debug!(error = %e, "tab close error");
        }

        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "browser close error");
            }
            let _ = browser.wait().await;
        }
        self.handler_task.abort();

        Ok(())
    }
}
