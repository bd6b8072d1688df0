use std::time::Duration;

use super::error::{CouchDaoError, CouchResult};

const DEFAULT_LONGPOLL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONFLICT_RETRIES: usize = 5;

/// Connection settings for the CouchDB document store.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    pub base_url: String,
    pub database: String,
    pub credentials: Option<(String, String)>,
    /// How long a `_changes` long-poll may hang before CouchDB answers empty.
    pub longpoll_timeout: Duration,
    /// Attempts an update makes when its `_rev` keeps losing races.
    pub conflict_retries: usize,
}

impl CouchConfig {
    /// Settings for `database` on the server at `base_url`, without credentials.
    pub fn new(base_url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            database: database.into(),
            credentials: None,
            longpoll_timeout: DEFAULT_LONGPOLL_TIMEOUT,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    /// Attach basic-auth credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Read `COUCH_BASE_URL`, `COUCH_DB` and the optional `COUCH_USERNAME`/`COUCH_PASSWORD`
    /// and `COUCH_LONGPOLL_TIMEOUT_SECS`.
    pub fn from_env() -> CouchResult<Self> {
        let required = |var: &'static str| {
            std::env::var(var)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .ok_or(CouchDaoError::MissingEnvVar { var })
        };

        let mut config = Self::new(required("COUCH_BASE_URL")?, required("COUCH_DB")?);

        if let (Ok(username), Ok(password)) = (
            std::env::var("COUCH_USERNAME"),
            std::env::var("COUCH_PASSWORD"),
        ) {
            config = config.with_credentials(username, password);
        }

        if let Some(secs) = std::env::var("COUCH_LONGPOLL_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
        {
            config.longpoll_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}
