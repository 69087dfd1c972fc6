//! Child environment construction.
//!
//! Agents never inherit the parent's full environment. They see a fixed
//! allowlist (shell and locale basics, home and path, proxy and CA settings),
//! then the invocation's own overrides, then the forced non-interactive
//! values.

use std::collections::BTreeMap;

/// Parent variables forwarded to every child when set.
pub const ENV_ALLOWLIST: &[&str] = &[
    // Shell / user basics
    "HOME",
    "PATH",
    "USER",
    "LOGNAME",
    "SHELL",
    "TERM",
    "TMPDIR",
    "TMP",
    "TEMP",
    // Locale
    "LANG",
    "LANGUAGE",
    "LC_ALL",
    "LC_CTYPE",
    "LC_MESSAGES",
    "TZ",
    // Per-user config locations, where agents keep their own credentials
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
    "XDG_CACHE_HOME",
    "XDG_STATE_HOME",
    // Proxies and trust roots
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "ALL_PROXY",
    "http_proxy",
    "https_proxy",
    "no_proxy",
    "all_proxy",
    "SSL_CERT_FILE",
    "SSL_CERT_DIR",
    "NODE_EXTRA_CA_CERTS",
    // Windows essentials
    "SYSTEMROOT",
    "USERPROFILE",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
    "PATHEXT",
];

/// Always set last; they win over overrides.
pub const FORCED_ENV: &[(&str, &str)] = &[("NO_COLOR", "1"), ("CI", "true")];

/// Build the child environment from the current process environment.
pub fn child_env(overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    build_env(|name| std::env::var(name).ok(), overrides)
}

/// Build the child environment from an arbitrary parent lookup.
pub fn build_env<F>(parent: F, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = BTreeMap::new();
    for name in ENV_ALLOWLIST {
        if let Some(value) = parent(name) {
            env.insert((*name).to_string(), value);
        }
    }
    for (key, value) in overrides {
        env.insert(key.clone(), value.clone());
    }
    for (key, value) in FORCED_ENV {
        env.insert((*key).to_string(), (*value).to_string());
    }
    env
}
