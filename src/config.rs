//! Environment-driven configuration.
//!
//! Variables are read into [`KarmaEnv`] with serde, in the spirit of the [`envy`] crate but small
//! enough to cover just the string and integer settings used here.
//!
//! [`envy`]: https://github.com/softprops/envy

use core::fmt;
use core::str::FromStr;
use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde::de::value::MapDeserializer;
use serde::de::{self, IntoDeserializer, Visitor};
use thiserror::Error;

use crate::karma::{DateRange, KarmaError};
use crate::titles::{AutoTitles, DEFAULT_TOP10_TITLE, DEFAULT_TOP25_TITLE};

pub const POINTS_PREFIX: &str = "KARMA_POINTS_";

pub type ConfigResult<T> = core::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error(transparent)]
    Deserialize(#[from] EnvError),

    #[error("invalid value for {var}: {source}")]
    Invalid {
        var: &'static str,
        #[source]
        source: KarmaError,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct KarmaEnv {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Unset selects the in-memory title store.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_leaderboard_size")]
    pub karma_leaderboard_size: usize,

    #[serde(default = "default_title_range")]
    pub karma_title_range: String,

    #[serde(default = "default_top10_title")]
    pub karma_top10_title: String,

    #[serde(default = "default_top25_title")]
    pub karma_top25_title: String,

    #[serde(default = "default_cron_interval_secs")]
    pub karma_cron_interval_secs: u64,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_owned()
}

fn default_leaderboard_size() -> usize {
    crate::karma::manager::DEFAULT_LEADERBOARD_SIZE
}

fn default_title_range() -> String {
    DateRange::Week.as_str().to_owned()
}

fn default_top10_title() -> String {
    DEFAULT_TOP10_TITLE.to_owned()
}

fn default_top25_title() -> String {
    DEFAULT_TOP25_TITLE.to_owned()
}

fn default_cron_interval_secs() -> u64 {
    60 * 60 * 24
}

impl KarmaEnv {
    /// Loads `.env` if there is one, then reads the process environment.
    pub fn load() -> ConfigResult<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(e.into());
            }
        }

        Ok(from_vars(dotenvy::vars())?)
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref().filter(|url| !url.is_empty())
    }

    pub fn title_range(&self) -> ConfigResult<DateRange> {
        self.karma_title_range
            .parse()
            .map_err(|source| ConfigError::Invalid {
                var: "KARMA_TITLE_RANGE",
                source,
            })
    }

    pub fn auto_titles(&self) -> AutoTitles {
        AutoTitles {
            top10: self.karma_top10_title.clone(),
            top25: self.karma_top25_title.clone(),
        }
    }

    pub fn cron_interval(&self) -> Duration {
        Duration::from_secs(self.karma_cron_interval_secs)
    }
}

/// `KARMA_POINTS_<KIND>` values from the process environment, keyed by `<KIND>`.
pub fn points_overrides() -> ConfigResult<HashMap<String, i64>> {
    Ok(from_prefixed_vars(POINTS_PREFIX, dotenvy::vars())?)
}

// ---
//  Env deserializer
// ---

/// Deserializes `T` from `(name, value)` pairs. Every value is a string; numbers are parsed on
/// demand and unknown names are ignored.
pub fn from_vars<T, I>(vars: I) -> Result<T, EnvError>
where
    T: de::DeserializeOwned,
    I: IntoIterator<Item = (String, String)>,
{
    let pairs = vars
        .into_iter()
        .map(|(name, raw)| (name.clone(), EnvValue { name, raw }));

    T::deserialize(MapDeserializer::new(pairs))
}

/// Like [`from_vars`], keeping only names that start with `prefix` and stripping it off.
pub fn from_prefixed_vars<T, I>(prefix: &str, vars: I) -> Result<T, EnvError>
where
    T: de::DeserializeOwned,
    I: IntoIterator<Item = (String, String)>,
{
    from_vars(
        vars.into_iter()
            .filter_map(|(name, raw)| name.strip_prefix(prefix).map(|rest| (rest.to_owned(), raw))),
    )
}

struct EnvValue {
    name: String,
    raw: String,
}

impl EnvValue {
    fn parse<T>(&self) -> Result<T, EnvError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.raw
            .trim()
            .parse()
            .map_err(|e| EnvError::Invalid(format!("{}='{}': {e}", self.name, self.raw)))
    }
}

impl IntoDeserializer<'_, EnvError> for EnvValue {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

impl<'de> de::Deserializer<'de> for EnvValue {
    type Error = EnvError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, EnvError> {
        visitor.visit_string(self.raw)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, EnvError> {
        visitor.visit_some(self)
    }

    fn deserialize_i64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, EnvError> {
        visitor.visit_i64(self.parse()?)
    }

    fn deserialize_u64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, EnvError> {
        visitor.visit_u64(self.parse()?)
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i128 u8 u16 u32 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("bad environment value {0}")]
    Invalid(String),

    #[error("missing environment variable {0}")]
    Missing(String),

    #[error("env deserialization error: {0}")]
    Custom(String),
}

impl de::Error for EnvError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        EnvError::Custom(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        EnvError::Missing(field.to_owned())
    }
}
