//! Cookie-backed session storage.
//!
//! Reads cookies from the request `Cookie` header into a jar and turns every
//! change made while handling the request into `Set-Cookie` headers. Values
//! are either stored in the clear or encrypted with a [`Key`]; the store has
//! no idea what the values mean.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, SET_COOKIE},
};
use axum::response::{IntoResponseParts, ResponseParts};
use chrono::{DateTime, Utc};
use cookie::time::OffsetDateTime;
use cookie::{Cookie, CookieJar, Key, SameSite};
use std::convert::Infallible;

/// Factory for per-request cookie jars.
#[derive(Clone)]
pub struct CookieStore {
    key: Option<Key>,
    secure: bool,
}

impl CookieStore {
    /// `key` switches on encryption; `secure` marks every written cookie `Secure`.
    pub fn new(key: Option<Key>, secure: bool) -> Self {
        Self { key, secure }
    }

    pub fn plain(secure: bool) -> Self {
        Self::new(None, secure)
    }

    pub fn encrypted(key: Key, secure: bool) -> Self {
        Self::new(Some(key), secure)
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    /// Load the cookies sent with a request.
    pub fn load(&self, headers: &HeaderMap) -> SessionCookies {
        let mut jar = CookieJar::new();
        for raw in headers.get_all(COOKIE).iter().filter_map(|v| v.to_str().ok()) {
            for cookie in Cookie::split_parse(raw).flatten() {
                jar.add_original(cookie.into_owned());
            }
        }

        SessionCookies {
            jar,
            key: self.key.clone(),
            secure: self.secure,
        }
    }
}

/// Cookies of a single request plus the changes to send back.
pub struct SessionCookies {
    jar: CookieJar,
    key: Option<Key>,
    secure: bool,
}

impl SessionCookies {
    /// Read a cookie value. Empty values and values that fail to decrypt
    /// read as absent.
    pub fn get(&self, name: &str) -> Option<String> {
        let cookie = match &self.key {
            Some(key) => self.jar.private(key).get(name),
            None => self.jar.get(name).cloned(),
        }?;

        let value = cookie.value();
        (!value.is_empty()).then(|| value.to_string())
    }

    /// Write a cookie that expires at `expires`.
    pub fn set(&mut self, name: &str, value: impl Into<String>, expires: DateTime<Utc>) {
        let cookie = self.build(name, value.into(), to_offset(expires));
        match &self.key {
            Some(key) => self.jar.private_mut(key).add(cookie),
            None => self.jar.add(cookie),
        }
    }

    /// Overwrite a cookie with an empty value and a past expiry.
    pub fn clear(&mut self, name: &str) {
        let cookie = self.build(name, String::new(), OffsetDateTime::UNIX_EPOCH);
        self.jar.add(cookie);
    }

    /// Cookies written while handling this request.
    pub fn changes(&self) -> impl Iterator<Item = &Cookie<'static>> {
        self.jar.delta()
    }

    fn build(&self, name: &str, value: String, expires: OffsetDateTime) -> Cookie<'static> {
        Cookie::build((name.to_string(), value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .expires(expires)
            .build()
    }
}

impl IntoResponseParts for SessionCookies {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        for cookie in self.jar.delta() {
            if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
                res.headers_mut().append(SET_COOKIE, value);
            }
        }
        Ok(res)
    }
}

fn to_offset(at: DateTime<Utc>) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(at.timestamp()).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
