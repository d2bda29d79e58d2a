//! Bearer credential resolution for the upgrade request.
//!
//! Sources are tried in a fixed order and the first non-empty token wins:
//!
//! 1. `Authorization: Bearer <token>` header
//! 2. `access_token` cookie
//! 3. `token` query parameter (deprecated, logged on every use)

use axum::http::{header, HeaderMap};
use axum_extra::extract::cookie::CookieJar;

/// Cookie carrying the session token.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Deprecated query parameter carrying the session token.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Where a credential was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    AuthorizationHeader,
    Cookie,
    QueryParameter,
}

impl CredentialSource {
    /// Priority order used by [`resolve_credential`].
    pub const PRIORITY: [CredentialSource; 3] = [
        CredentialSource::AuthorizationHeader,
        CredentialSource::Cookie,
        CredentialSource::QueryParameter,
    ];

    /// Query tokens end up in access logs and browser history.
    pub fn is_deprecated(&self) -> bool {
        matches!(self, CredentialSource::QueryParameter)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::AuthorizationHeader => "authorization_header",
            CredentialSource::Cookie => "cookie",
            CredentialSource::QueryParameter => "query_parameter",
        }
    }

    fn extract(&self, headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
        let token = match self {
            CredentialSource::AuthorizationHeader => headers
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "))
                .map(str::to_string),
            CredentialSource::Cookie => CookieJar::from_headers(headers)
                .get(ACCESS_TOKEN_COOKIE)
                .map(|cookie| cookie.value().to_string()),
            CredentialSource::QueryParameter => query_token.map(str::to_string),
        }?;

        let token = token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }
}

/// A bearer token and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub source: CredentialSource,
}

/// Pick the highest-priority credential present on the request.
pub fn resolve_credential(headers: &HeaderMap, query_token: Option<&str>) -> Option<Credential> {
    let credential = CredentialSource::PRIORITY.iter().find_map(|source| {
        source.extract(headers, query_token).map(|token| Credential {
            token,
            source: *source,
        })
    })?;

    if credential.source.is_deprecated() {
        tracing::warn!(
            source = credential.source.as_str(),
            "Deprecated credential source used for WebSocket upgrade; send an Authorization header or access_token cookie instead"
        );
    }

    Some(credential)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn header_wins_over_cookie_and_query() {
        let map = headers(&[
            (header::AUTHORIZATION, "Bearer from-header"),
            (header::COOKIE, "access_token=from-cookie"),
        ]);

        let credential = resolve_credential(&map, Some("from-query")).unwrap();

        assert_eq!(credential.token, "from-header");
        assert_eq!(credential.source, CredentialSource::AuthorizationHeader);
    }

    #[test]
    fn cookie_is_used_without_header() {
        let map = headers(&[(header::COOKIE, "theme=dark; access_token=from-cookie")]);

        let credential = resolve_credential(&map, Some("from-query")).unwrap();

        assert_eq!(credential.token, "from-cookie");
        assert_eq!(credential.source, CredentialSource::Cookie);
    }

    #[test]
    fn query_is_last_resort() {
        let credential = resolve_credential(&HeaderMap::new(), Some("from-query")).unwrap();

        assert_eq!(credential.source, CredentialSource::QueryParameter);
        assert!(credential.source.is_deprecated());
    }

    #[test]
    fn non_bearer_header_falls_through() {
        let map = headers(&[(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")]);

        let credential = resolve_credential(&map, Some("from-query")).unwrap();

        assert_eq!(credential.source, CredentialSource::QueryParameter);
    }

    #[test]
    fn blank_tokens_are_ignored() {
        let map = headers(&[
            (header::AUTHORIZATION, "Bearer   "),
            (header::COOKIE, "access_token="),
        ]);

        assert!(resolve_credential(&map, Some("")).is_none());
    }

    #[test]
    fn nothing_presented() {
        assert!(resolve_credential(&HeaderMap::new(), None).is_none());
    }
}
