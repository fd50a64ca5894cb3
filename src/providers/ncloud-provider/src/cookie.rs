//! Turns the `Set-Cookie`-style string returned by a confirmed login into a
//! `Cookie` request header and a session expiry.

use chrono::{DateTime, Duration, Utc};

/// Cookie carrying the login credential.
pub const LOGIN_COOKIE: &str = "MUSIC_U";

/// Lifetime assumed when the login cookie carries no expiry attribute.
pub const DEFAULT_SESSION_LIFETIME_DAYS: i64 = 30;

const ATTRIBUTES: &[&str] = &[
    "max-age", "expires", "path", "domain", "httponly", "secure", "samesite",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCookie {
    /// `name=value` pairs joined with `; `, attributes removed.
    pub header: String,
    pub expires_at: DateTime<Utc>,
    pub has_login_cookie: bool,
}

/// Parses a raw cookie string; `None` when it holds no cookie at all.
pub fn parse_login_cookie(raw: &str, now: DateTime<Utc>) -> Option<LoginCookie> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut current: Option<String> = None;
    let mut login_expiry: Option<DateTime<Utc>> = None;
    let mut login_max_age = false;

    for item in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, value) = match item.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (item, ""),
        };
        let lowered = name.to_ascii_lowercase();

        if ATTRIBUTES.contains(&lowered.as_str()) {
            if current.as_deref() == Some(LOGIN_COOKIE) {
                match lowered.as_str() {
                    "max-age" => {
                        let expiry = value
                            .parse::<i64>()
                            .ok()
                            .and_then(Duration::try_seconds)
                            .and_then(|lifetime| now.checked_add_signed(lifetime));
                        if let Some(expiry) = expiry {
                            login_expiry = Some(expiry);
                            login_max_age = true;
                        }
                    }
                    "expires" if !login_max_age => {
                        if let Ok(at) = DateTime::parse_from_rfc2822(value) {
                            login_expiry = Some(at.with_timezone(&Utc));
                        }
                    }
                    _ => {}
                }
            }
            continue;
        }

        if value.is_empty() {
            current = None;
            continue;
        }

        current = Some(name.to_string());
        match pairs.iter_mut().find(|(existing, _)| existing == name) {
            Some(pair) => pair.1 = value.to_string(),
            None => pairs.push((name.to_string(), value.to_string())),
        }
    }

    if pairs.is_empty() {
        return None;
    }

    let has_login_cookie = pairs.iter().any(|(name, _)| name == LOGIN_COOKIE);
    let header = pairs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ");
    Some(LoginCookie {
        header,
        expires_at: login_expiry
            .unwrap_or_else(|| now + Duration::days(DEFAULT_SESSION_LIFETIME_DAYS)),
        has_login_cookie,
    })
}
