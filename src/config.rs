//! Application-level configuration loading: session identity, challenge catalog and timing.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::{
    roster::{Challenge, ChallengeCatalog},
    session::MAX_SESSION_MINUTES,
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "VIBE_LIVE_BACK_CONFIG_PATH";

const DEFAULT_SESSION_ID: &str = "vibe-live";
const DEFAULT_DURATION_MINUTES: u64 = 25;
const DEFAULT_LEADERBOARD_SIZE: usize = 5;
const DEFAULT_GRADING_PRESETS: [u32; 2] = [10, 20];
const DEFAULT_RESET_UNLOCK: Duration = Duration::from_secs(60);
const MAX_RESET_UNLOCK_SECS: u64 = 60 * 60;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    session_id: String,
    default_duration: Duration,
    leaderboard_size: usize,
    grading_presets: Vec<u32>,
    reset_unlock_ttl: Duration,
    catalog: ChallengeCatalog,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        session_id = %app_config.session_id,
                        challenges = app_config.catalog.len(),
                        "loaded session config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Identifier scoping the team collection.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Countdown length used when the operator does not pick one.
    pub fn default_duration(&self) -> Duration {
        self.default_duration
    }

    /// How many teams the revealed leaderboard shows.
    pub fn leaderboard_size(&self) -> usize {
        self.leaderboard_size
    }

    /// Point values offered to the operator when grading.
    pub fn grading_presets(&self) -> &[u32] {
        &self.grading_presets
    }

    /// Lifetime of a reset unlock.
    pub fn reset_unlock_ttl(&self) -> Duration {
        self.reset_unlock_ttl
    }

    /// The challenges of this session.
    pub fn catalog(&self) -> &ChallengeCatalog {
        &self.catalog
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session_id: DEFAULT_SESSION_ID.into(),
            default_duration: Duration::from_secs(DEFAULT_DURATION_MINUTES * 60),
            leaderboard_size: DEFAULT_LEADERBOARD_SIZE,
            grading_presets: DEFAULT_GRADING_PRESETS.to_vec(),
            reset_unlock_ttl: DEFAULT_RESET_UNLOCK,
            catalog: ChallengeCatalog::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    session_id: Option<String>,
    default_duration_minutes: Option<u64>,
    leaderboard_size: Option<usize>,
    grading_presets: Option<Vec<u32>>,
    reset_unlock_seconds: Option<u64>,
    challenges: Option<Vec<RawChallenge>>,
}

#[derive(Debug, Deserialize)]
/// JSON representation of a single challenge inside the configuration file.
struct RawChallenge {
    id: u32,
    name: String,
    #[serde(default)]
    description: String,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = Self::default();

        let session_id = match value.session_id {
            Some(id) if is_valid_session_id(&id) => id,
            Some(id) => {
                warn!(session_id = %id, "invalid session id in config; using default");
                defaults.session_id
            }
            None => defaults.session_id,
        };

        let catalog = match value.challenges {
            Some(challenges) if !challenges.is_empty() => ChallengeCatalog::new(
                challenges
                    .into_iter()
                    .map(|raw| Challenge {
                        id: raw.id,
                        name: raw.name,
                        description: raw.description,
                    })
                    .collect(),
            ),
            _ => defaults.catalog,
        };

        Self {
            session_id,
            default_duration: bounded(
                "defaultDurationMinutes",
                value.default_duration_minutes,
                MAX_SESSION_MINUTES,
            )
            .and_then(|minutes| minutes.checked_mul(60))
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_duration),
            leaderboard_size: value
                .leaderboard_size
                .filter(|size| *size > 0)
                .unwrap_or(defaults.leaderboard_size),
            grading_presets: value
                .grading_presets
                .filter(|presets| !presets.is_empty())
                .unwrap_or(defaults.grading_presets),
            reset_unlock_ttl: bounded(
                "resetUnlockSeconds",
                value.reset_unlock_seconds,
                MAX_RESET_UNLOCK_SECS,
            )
            .map(Duration::from_secs)
            .unwrap_or(defaults.reset_unlock_ttl),
            catalog,
        }
    }
}

/// Keep `value` when it lies in `1..=max`; anything else falls back to the default.
fn bounded(field: &str, value: Option<u64>, max: u64) -> Option<u64> {
    let value = value?;
    if (1..=max).contains(&value) {
        Some(value)
    } else {
        warn!(field, value, max, "config value out of range; using default");
        None
    }
}

/// Session ids end up in collection names, so keep them to a URL-safe alphabet.
fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
