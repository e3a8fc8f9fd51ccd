//! Parameter accessor contract.
//!
//! The export flow never parses flags or reads preference files itself. It
//! asks a [`ParamSource`] for pre-supplied values (`get_param`) and for
//! configured or last-used values (`get_config`), in that order.

use std::collections::HashMap;
use std::fmt;

use crate::config::AppConfig;

/// Keys the export flow may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKey {
    Service,
    AspectRatio,
    Resolution,
    AutoEdit,
    OutputPath,
    MovieId,
    OwnerId,
    LoadTimeoutMinutes,
    CompletionTimeoutMinutes,
}

impl ParamKey {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamKey::Service => "service",
            ParamKey::AspectRatio => "aspect_ratio",
            ParamKey::Resolution => "resolution",
            ParamKey::AutoEdit => "auto_edit",
            ParamKey::OutputPath => "output_path",
            ParamKey::MovieId => "movie_id",
            ParamKey::OwnerId => "owner_id",
            ParamKey::LoadTimeoutMinutes => "load_timeout_minutes",
            ParamKey::CompletionTimeoutMinutes => "completion_timeout_minutes",
        }
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of export parameters.
pub trait ParamSource: Send + Sync {
    /// A value supplied for this run (flags, prompts, GUI fields).
    fn get_param(&self, key: ParamKey) -> Option<String>;

    /// A configured or last-used value.
    fn get_config(&self, key: ParamKey) -> Option<String>;

    /// `get_param`, falling back to `get_config`. Blank values count as absent.
    fn resolve(&self, key: ParamKey) -> Option<String> {
        self.get_param(key)
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.get_config(key).filter(|v| !v.trim().is_empty()))
    }
}

/// Explicit values layered over an [`AppConfig`].
#[derive(Debug, Clone, Default)]
pub struct LayeredParams {
    explicit: HashMap<ParamKey, String>,
    config: AppConfig,
}

impl LayeredParams {
    pub fn new(config: AppConfig) -> Self {
        Self {
            explicit: HashMap::new(),
            config,
        }
    }

    /// Set a pre-supplied value.
    pub fn set(&mut self, key: ParamKey, value: impl Into<String>) -> &mut Self {
        self.explicit.insert(key, value.into());
        self
    }

    /// Set a pre-supplied value when one is given.
    pub fn set_opt(&mut self, key: ParamKey, value: Option<impl Into<String>>) -> &mut Self {
        if let Some(value) = value {
            self.explicit.insert(key, value.into());
        }
        self
    }

    /// Drop a pre-supplied value so the next cycle asks again.
    pub fn clear(&mut self, key: ParamKey) {
        self.explicit.remove(&key);
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Record the resolved values as last-used.
    pub fn remember(&mut self, key: ParamKey, value: &str) {
        let last = &mut self.config.last_used;
        let value = Some(value.to_string());
        match key {
            ParamKey::Service => last.service = value,
            ParamKey::AspectRatio => last.aspect_ratio = value,
            ParamKey::Resolution => last.resolution = value,
            ParamKey::AutoEdit => last.auto_edit = value.and_then(|v| parse_bool(&v)),
            ParamKey::MovieId => last.movie_id = value,
            ParamKey::OwnerId => last.owner_id = value,
            _ => {}
        }
    }
}

impl ParamSource for LayeredParams {
    fn get_param(&self, key: ParamKey) -> Option<String> {
        self.explicit.get(&key).cloned()
    }

    fn get_config(&self, key: ParamKey) -> Option<String> {
        let last = &self.config.last_used;
        match key {
            ParamKey::Service => last.service.clone(),
            ParamKey::AspectRatio => last.aspect_ratio.clone(),
            ParamKey::Resolution => last.resolution.clone(),
            ParamKey::AutoEdit => last.auto_edit.map(|v| v.to_string()),
            ParamKey::MovieId => last.movie_id.clone(),
            ParamKey::OwnerId => last.owner_id.clone(),
            ParamKey::OutputPath => None,
            ParamKey::LoadTimeoutMinutes => Some(self.config.timeouts.load_minutes.to_string()),
            ParamKey::CompletionTimeoutMinutes => {
                Some(self.config.timeouts.completion_minutes.to_string())
            }
        }
    }
}

/// Parse the boolean spellings accepted from flags and prompts.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_values_win_over_last_used() {
        let mut config = AppConfig::default();
        config.last_used.service = Some("local".to_string());
        let mut params = LayeredParams::new(config);
        assert_eq!(params.resolve(ParamKey::Service).as_deref(), Some("local"));

        params.set(ParamKey::Service, "ft");
        assert_eq!(params.resolve(ParamKey::Service).as_deref(), Some("ft"));
    }

    #[test]
    fn test_blank_values_are_absent() {
        let mut params = LayeredParams::new(AppConfig::default());
        params.set(ParamKey::MovieId, "   ");
        assert_eq!(params.resolve(ParamKey::MovieId), None);
    }

    #[test]
    fn test_timeouts_come_from_config() {
        let params = LayeredParams::new(AppConfig::default());
        assert_eq!(
            params.resolve(ParamKey::LoadTimeoutMinutes).as_deref(),
            Some("30")
        );
        assert_eq!(
            params.resolve(ParamKey::CompletionTimeoutMinutes).as_deref(),
            Some("0")
        );
    }

    #[test]
    fn test_remember_updates_last_used() {
        let mut params = LayeredParams::new(AppConfig::default());
        params.remember(ParamKey::AutoEdit, "yes");
        params.remember(ParamKey::OwnerId, "7");
        assert_eq!(params.config().last_used.auto_edit, Some(true));
        assert_eq!(params.config().last_used.owner_id.as_deref(), Some("7"));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("Y"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
