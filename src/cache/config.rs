//! Cache layer options.
//!
//! Recognized options mirror what a host passes at construction time; the
//! serializable subset can also come from `relcache.toml` or the environment.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Revalidation window used when a life profile name is not recognized.
pub const FALLBACK_REVALIDATE_SECONDS: u32 = 3_600;

/// Coarse time-to-live bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifeProfile {
    Seconds,
    Minutes,
    #[default]
    Hours,
    Days,
    Weeks,
    Max,
}

impl LifeProfile {
    pub const ALL: [Self; 6] = [
        Self::Seconds,
        Self::Minutes,
        Self::Hours,
        Self::Days,
        Self::Weeks,
        Self::Max,
    ];

    pub const fn seconds(self) -> u32 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3_600,
            Self::Days => 86_400,
            Self::Weeks => 604_800,
            Self::Max => 31_536_000,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Weeks => "weeks",
            Self::Max => "max",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|profile| profile.as_str() == name)
    }

    /// Revalidation seconds for a profile name; unknown names map to one hour.
    pub fn seconds_for(name: &str) -> u32 {
        Self::from_name(name).map_or(FALLBACK_REVALIDATE_SECONDS, Self::seconds)
    }
}

impl fmt::Display for LifeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown life profile `{0}` (expected seconds|minutes|hours|days|weeks|max)")]
pub struct ParseLifeProfileError(pub String);

impl FromStr for LifeProfile {
    type Err = ParseLifeProfileError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_name(value.trim()).ok_or_else(|| ParseLifeProfileError(value.to_string()))
    }
}

/// Host-supplied tag generator: `(model, id) -> tags`.
pub type TagGenerator = Arc<dyn Fn(&str, Option<&str>) -> Vec<String> + Send + Sync>;

/// Options accepted by [`crate::cache::CacheLayer`].
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Life profile for models that declare none.
    pub default_life_profile: LifeProfile,
    /// Models that are never cached, in addition to those carrying the
    /// exclusion attribute.
    pub excluded_models: BTreeSet<String>,
    /// Emit per-call key/tag diagnostics at debug level.
    pub debug_logging: bool,
    /// Replaces tag derivation entirely when present.
    #[serde(skip)]
    pub custom_tag_generator: Option<TagGenerator>,
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("default_life_profile", &self.default_life_profile)
            .field("excluded_models", &self.excluded_models)
            .field("debug_logging", &self.debug_logging)
            .field(
                "custom_tag_generator",
                &self.custom_tag_generator.as_ref().map(|_| "<fn>"),
            )
            .finish()
    }
}

impl CacheOptions {
    pub fn with_default_life_profile(mut self, profile: LifeProfile) -> Self {
        self.default_life_profile = profile;
        self
    }

    pub fn exclude_model(mut self, model: impl Into<String>) -> Self {
        self.excluded_models.insert(model.into());
        self
    }

    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    pub fn with_tag_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&str, Option<&str>) -> Vec<String> + Send + Sync + 'static,
    {
        self.custom_tag_generator = Some(Arc::new(generator));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let options = CacheOptions::default();
        assert_eq!(options.default_life_profile, LifeProfile::Hours);
        assert!(options.excluded_models.is_empty());
        assert!(!options.debug_logging);
        assert!(options.custom_tag_generator.is_none());
    }

    #[test]
    fn profile_seconds_table() {
        let table: Vec<_> = LifeProfile::ALL
            .into_iter()
            .map(|profile| (profile.as_str(), profile.seconds()))
            .collect();
        assert_eq!(
            table,
            [
                ("seconds", 1),
                ("minutes", 60),
                ("hours", 3_600),
                ("days", 86_400),
                ("weeks", 604_800),
                ("max", 31_536_000),
            ]
        );
    }

    #[test]
    fn unknown_profile_falls_back_to_an_hour() {
        assert_eq!(LifeProfile::seconds_for("fortnight"), 3_600);
        assert_eq!(LifeProfile::seconds_for("Days"), 3_600);
        assert_eq!(LifeProfile::seconds_for("weeks"), 604_800);
    }

    #[test]
    fn profile_parses_from_str() {
        assert_eq!("max".parse::<LifeProfile>(), Ok(LifeProfile::Max));
        assert_eq!(
            "forever".parse::<LifeProfile>(),
            Err(ParseLifeProfileError("forever".to_string()))
        );
    }

    #[test]
    fn options_deserialize_without_generator() {
        let options: CacheOptions = serde_json::from_value(serde_json::json!({
            "default_life_profile": "days",
            "excluded_models": ["Session"],
            "debug_logging": true,
        }))
        .expect("options deserialize");

        assert_eq!(options.default_life_profile, LifeProfile::Days);
        assert!(options.excluded_models.contains("Session"));
        assert!(options.debug_logging);
        assert!(options.custom_tag_generator.is_none());
    }

    #[test]
    fn debug_output_hides_generator() {
        let options = CacheOptions::default().with_tag_generator(|_, _| Vec::new());
        assert!(format!("{options:?}").contains("<fn>"));
    }
}
