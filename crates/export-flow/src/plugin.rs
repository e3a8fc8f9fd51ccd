//! Legacy plugin permission, granted through the browser's site settings.
//!
//! The settings page has no scriptable API, so the permission is flipped by
//! walking focus with TAB to the plugin control and choosing "Allow". The
//! number of TAB presses depends on the browser build and is tunable per
//! service.

use std::time::Duration;

use goexport_common::error::ExportResult;

use crate::driver::{Key, PlaybackDriver};

/// Settings page for the site currently loaded.
pub fn site_settings_url(site: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(site.as_bytes()).collect();
    format!("chrome://settings/content/siteDetails?site={encoded}")
}

/// Allow the plugin for the current site, then return to it and reload.
pub async fn enable_plugin(driver: &mut dyn PlaybackDriver, tab_count: u32, key_delay: Duration) -> ExportResult<()> {
    let site = driver.current_url().await?;
    tracing::info!(site = %site, tab_count, "Enabling plugin");
    driver.navigate(&site_settings_url(&site)).await?;

    for _ in 0..tab_count {
        driver.press_key(Key::Tab).await?;
        tokio::time::sleep(key_delay).await;
    }
    for key in [Key::Space, Key::ArrowDown, Key::Enter] {
        driver.press_key(key).await?;
        tokio::time::sleep(key_delay).await;
    }

    driver.back().await?;
    driver.refresh().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    #[async_trait::async_trait]
    impl PlaybackDriver for Recorder {
        async fn navigate(&mut self, url: &str) -> ExportResult<()> {
            self.calls.push(format!("navigate {url}"));
            Ok(())
        }
        async fn current_url(&mut self) -> ExportResult<String> {
            Ok("http://localhost:26519/index.html?movieId=m-1".into())
        }
        async fn inject_script_now(&mut self, _script: &str) -> ExportResult<()> {
            Ok(())
        }
        async fn inject_script_on_future_loads(&mut self, _script: &str) -> ExportResult<()> {
            Ok(())
        }
        async fn read_global(&mut self, _name: &str) -> ExportResult<Option<Value>> {
            Ok(None)
        }
        async fn press_key(&mut self, key: Key) -> ExportResult<()> {
            self.calls.push(format!("{key:?}"));
            Ok(())
        }
        async fn back(&mut self) -> ExportResult<()> {
            self.calls.push("back".into());
            Ok(())
        }
        async fn refresh(&mut self) -> ExportResult<()> {
            self.calls.push("refresh".into());
            Ok(())
        }
        async fn close(&mut self) -> ExportResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_site_settings_url_encodes_site() {
        assert_eq!(
            site_settings_url("http://localhost:26519/index.html?a=1&b=2"),
            "chrome://settings/content/siteDetails?site=http%3A%2F%2Flocalhost%3A26519%2Findex.html%3Fa%3D1%26b%3D2"
        );
    }

    #[tokio::test]
    async fn test_key_sequence() {
        let mut driver = Recorder::default();
        enable_plugin(&mut driver, 3, Duration::ZERO).await.unwrap();
        assert!(driver.calls[0].starts_with("navigate chrome://settings/content/siteDetails?site=http%3A"));
        assert_eq!(
            &driver.calls[1..],
            ["Tab", "Tab", "Tab", "Space", "ArrowDown", "Enter", "back", "refresh"]
        );
    }
}
