use crate::scrapers::traits::PageFetcher;
use crate::scrapers::types::{Document, FetchError, ScrapeSettings};
use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::io::{self, BufRead, Write};
use std::ops::Deref;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Time given to client-side rendering after navigation
const SETTLE_TIME: Duration = Duration::from_secs(2);

/// Browser-based fetcher using Chrome, for sites that put a challenge page
/// in front of plain HTTP clients
pub struct BrowserFetcher {
    browser: Browser,
    confirm_challenge: bool,
}

impl BrowserFetcher {
    pub fn new(settings: &ScrapeSettings) -> Result<Self> {
        info!(
            "Launching {} Chrome...",
            if settings.headed { "headed" } else { "headless" }
        );

        let options = LaunchOptions::default_builder()
            .headless(!settings.headed)
            .idle_browser_timeout(Duration::from_secs(600))
            .build()
            .context("Failed to build launch options")?;

        let browser = Browser::new(options).context("Failed to launch Chrome browser")?;

        Ok(Self {
            browser,
            confirm_challenge: settings.confirm_challenge,
        })
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<Document, FetchError> {
        let browser = self.browser.clone();
        let confirm = self.confirm_challenge;
        let target = url.to_string();

        // headless_chrome and the operator prompt both block the thread
        let outcome =
            tokio::task::spawn_blocking(move || load_page(&browser, &target, confirm)).await;

        match outcome {
            Ok(Ok(html)) => Ok(Document::new(url, html)),
            Ok(Err(e)) => Err(e),
            Err(join_error) => Err(FetchError::Browser {
                url: url.to_string(),
                message: join_error.to_string(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}

fn load_page(browser: &Browser, url: &str, confirm: bool) -> Result<String, FetchError> {
    let tab = Closing(browser.new_tab().map_err(|e| browser_error(url, e))?);

    debug!("Navigating to {}", url);
    tab.navigate_to(url).map_err(|e| browser_error(url, e))?;
    if let Err(e) = tab.wait_until_navigated() {
        warn!("Page load wait failed for {}: {:#}", url, e);
    }

    if confirm {
        wait_for_operator(url)?;
    }

    thread::sleep(SETTLE_TIME);

    let html = tab
        .evaluate("document.documentElement.outerHTML", false)
        .map_err(|e| browser_error(url, e))?
        .value
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default();

    if html.is_empty() {
        warn!("HTML is empty for {}", url);
    }

    Ok(html)
}

fn browser_error(url: &str, e: anyhow::Error) -> FetchError {
    FetchError::Browser {
        url: url.to_string(),
        message: format!("{:#}", e),
    }
}

/// Something holding a browser-side resource that has to be released
trait Close {
    fn close(&self);
}

impl Close for Arc<Tab> {
    fn close(&self) {
        if let Err(e) = Tab::close(self, true) {
            debug!("Could not close tab: {:#}", e);
        }
    }
}

/// Closes what it holds when dropped, whichever way the page load ends
struct Closing<T: Close>(T);

impl<T: Close> Deref for Closing<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Close> Drop for Closing<T> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Block until the operator confirms the page is usable. No timeout.
fn wait_for_operator(url: &str) -> Result<(), FetchError> {
    println!("Solve the CAPTCHA manually if it appears, then press ENTER to continue.");
    let _ = io::stdout().flush();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(n) if n > 0 => Ok(()),
        _ => Err(FetchError::Interrupted {
            url: url.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingTab<'a>(&'a Cell<u32>);

    impl Close for CountingTab<'_> {
        fn close(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn load(closed: &Cell<u32>, fail: bool) -> Result<(), FetchError> {
        let _tab = Closing(CountingTab(closed));
        if fail {
            return Err(FetchError::Interrupted {
                url: "https://a.test".to_string(),
            });
        }
        Ok(())
    }

    #[test]
    fn tab_is_closed_on_success_and_on_early_return() {
        let closed = Cell::new(0);

        assert!(load(&closed, false).is_ok());
        assert_eq!(closed.get(), 1);

        assert!(load(&closed, true).is_err());
        assert_eq!(closed.get(), 2);
    }
}
