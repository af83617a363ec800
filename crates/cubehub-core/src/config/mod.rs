//! Process-wide system parameters and the acting-user context.
//!
//! A single environment variable carries a JSON object that is read once per
//! process. The acting user is an explicit argument on every repository
//! operation; [`current_user`] is the ambient fallback for call sites that
//! cannot thread it.

use std::cell::RefCell;
use std::sync::OnceLock;

use serde::Deserialize;

/// Environment variable holding the JSON system-parameter object.
pub const PARAMS_ENV: &str = "CUBEHUB_PARAMS";

/// Environment variable injected into classpath coordinates as `env` when
/// the caller does not supply one.
pub const ENV_LEVEL: &str = "ENV_LEVEL";

/// User assumed when nothing else names one.
const FALLBACK_USER: &str = "local";

/// Parsed once-per-process configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemParams {
    /// Override for the acting user.
    #[serde(default)]
    pub user: Option<String>,

    /// Environment level injected into classpath lookups.
    #[serde(default)]
    pub env_level: Option<String>,

    /// Skips the reader-quiesce sleep during release workflows.
    #[serde(default)]
    pub test_mode: bool,
}

impl SystemParams {
    /// Parses the parameter object, tolerating an absent or malformed value
    /// (malformed input logs a warning and yields defaults).
    #[must_use]
    pub fn from_json(raw: &str) -> Self {
        match serde_json::from_str(raw) {
            Ok(params) => params,
            Err(err) => {
                tracing::warn!(%err, "ignoring malformed {PARAMS_ENV} value");
                Self::default()
            }
        }
    }

    fn from_env() -> Self {
        let mut params = std::env::var(PARAMS_ENV)
            .ok()
            .map(|raw| Self::from_json(&raw))
            .unwrap_or_default();
        if params.env_level.is_none() {
            params.env_level = std::env::var(ENV_LEVEL).ok();
        }
        params
    }
}

static PARAMS: OnceLock<SystemParams> = OnceLock::new();

/// The process-wide system parameters, initialised on first use.
pub fn system_params() -> &'static SystemParams {
    PARAMS.get_or_init(SystemParams::from_env)
}

thread_local! {
    static ACTING_USER: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Sets (or clears) the acting user for the current thread.
pub fn set_current_user(user: Option<String>) {
    ACTING_USER.with(|slot| *slot.borrow_mut() = user);
}

/// The acting user for the current thread: the per-thread override, else the
/// system-parameter override, else the OS user, else `local`.
#[must_use]
pub fn current_user() -> String {
    if let Some(user) = ACTING_USER.with(|slot| slot.borrow().clone()) {
        return user;
    }
    if let Some(user) = &system_params().user {
        return user.clone();
    }
    std::env::var("USER").unwrap_or_else(|_| FALLBACK_USER.to_string())
}
