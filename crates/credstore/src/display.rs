//! Redaction and formatting helpers for human-readable output.
//!
//! Nothing here ever returns more of a secret than a short fixed prefix and
//! suffix. All slicing is by `char`, so multi-byte input is safe.

use chrono::{DateTime, Utc};
use ring::digest;

/// Asterisk run used between the visible prefix and suffix.
const MASK: &str = "********";

/// Tokens at or below this length are masked entirely.
const TOKEN_FULL_MASK_LEN: usize = 20;

/// Visible characters at each end of a long token.
const TOKEN_VISIBLE: usize = 8;

/// Separator between the visible ends of a masked token.
const TOKEN_SEPARATOR: &str = "...";

/// Longest prefix recognized by [`mask_api_key`], excluding the `_`.
const MAX_KEY_PREFIX_LEN: usize = 16;

fn stars(n: usize) -> String {
    "*".repeat(n)
}

fn head(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn tail(s: &str, n: usize) -> String {
    let len = s.chars().count();
    s.chars().skip(len.saturating_sub(n)).collect()
}

/// Generic mask: `****` for short values, else `abcd********wxyz`.
pub fn mask_credential(s: &str) -> String {
    let len = s.chars().count();
    if len <= 8 {
        return stars(len);
    }
    format!("{}{MASK}{}", head(s, 4), tail(s, 4))
}

/// Mask an API key of the form `<prefix>_<body>`, keeping the prefix.
///
/// `cs_live_abcdef0123456789` becomes `cs_********6789`. Keys without a
/// recognizable prefix fall back to [`mask_credential`].
pub fn mask_api_key(s: &str) -> String {
    let Some((prefix, body)) = s.split_once('_') else {
        return mask_credential(s);
    };
    let prefix_ok = !prefix.is_empty()
        && prefix.len() <= MAX_KEY_PREFIX_LEN
        && prefix.chars().all(|c| c.is_ascii_alphanumeric());
    if !prefix_ok {
        return mask_credential(s);
    }

    let body_len = body.chars().count();
    if body_len <= 8 {
        return format!("{prefix}_{}", stars(body_len));
    }
    format!("{prefix}_{MASK}{}", tail(body, 4))
}

/// Mask an opaque or structured (e.g. JWT) token.
///
/// Short tokens are fully starred; longer ones show 8 characters at each end
/// around a `...` marker.
pub fn mask_token(s: &str) -> String {
    let len = s.chars().count();
    if len <= TOKEN_FULL_MASK_LEN {
        return stars(len);
    }
    format!(
        "{}{TOKEN_SEPARATOR}{}",
        head(s, TOKEN_VISIBLE),
        tail(s, TOKEN_VISIBLE)
    )
}

/// Describe when a credential expires, relative to now.
pub fn format_expiry(expires_at: Option<DateTime<Utc>>) -> String {
    format_expiry_at(expires_at, Utc::now())
}

/// [`format_expiry`] against an explicit `now`.
///
/// `None` → `"never"`, past → `"expired"`, otherwise `"in N minutes"` under
/// an hour, `"in N hours"` under a day, `"in N days"` beyond.
pub fn format_expiry_at(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(expires_at) = expires_at else {
        return "never".to_string();
    };
    if expires_at <= now {
        return "expired".to_string();
    }

    // The unit is chosen after rounding, so 59m50s reads "in 1 hour".
    let secs = (expires_at - now).num_seconds();
    let minutes = ((secs + 30) / 60).max(1);
    let hours = (secs + 1_800) / 3_600;
    let (amount, unit) = if minutes < 60 {
        (minutes, "minute")
    } else if hours < 24 {
        (hours, "hour")
    } else {
        ((secs + 43_200) / 86_400, "day")
    };
    let plural = if amount == 1 { "" } else { "s" };
    format!("in {amount} {unit}{plural}")
}

/// Short, non-reversible fingerprint of a secret: the first 8 hex characters
/// of its SHA-256.
pub fn generate_key_id(secret: &str) -> String {
    let hash = digest::digest(&digest::SHA256, secret.as_bytes());
    hex::encode(&hash.as_ref()[..4])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
