//! Bearer credential lookup from a cookie store.
//!
//! Login stores the session token in a cookie; the transport and the REST
//! client both send it as `authorization: Bearer <token>`.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use crate::error::SessionError;

/// Cookies keyed by name. Later duplicates win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: HashMap<String, String>,
}

impl CookieJar {
    /// Parse `name=value` pairs separated by `;` or newlines.
    ///
    /// Accepts a raw `Cookie:` header value as well as one pair per line.
    /// Values are percent-decoded.
    /// Pairs without `=` and blank names are skipped.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let cookies = raw
            .split([';', '\n'])
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some((name.to_owned(), decode_value(value.trim().trim_matches('"'))))
            })
            .collect();
        Self { cookies }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

/// Percent-decode a cookie value; values that do not decode are kept verbatim.
fn decode_value(value: &str) -> String {
    urlencoding::decode(value).map_or_else(|_| value.to_owned(), Cow::into_owned)
}

/// Session bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Read the token stored under `cookie_name`.
    pub fn from_cookies(jar: &CookieJar, cookie_name: &str) -> Result<Self, SessionError> {
        jar.get(cookie_name)
            .filter(|token| !token.is_empty())
            .map(Self::new)
            .ok_or_else(|| SessionError::MissingCredential(cookie_name.to_owned()))
    }

    /// Value for the `authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[cfg(test)]
#[path = "credential_test.rs"]
mod credential_test;
