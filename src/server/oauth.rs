//! OAuth2 client-credentials token endpoint

use std::collections::HashMap;

use axum::{
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::Response,
};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::router::json_response;
use crate::auth::{Gatekeeper, authorization_header, parse_basic_header};
use crate::error::{ApiError, Challenge, ErrorCode};

/// The only grant type the endpoint accepts
pub const CLIENT_CREDENTIALS: &str = "client_credentials";

/// Handle a request to `/token`.
///
/// Credentials come from a `Basic` header with a non-empty username, and
/// otherwise from the `client_id`/`client_secret` form fields. When both are
/// present they must agree.
pub fn issue_token(
    gatekeeper: &Gatekeeper,
    method: &Method,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, ApiError> {
    if *method != Method::POST {
        return Err(ApiError::MethodNotAllowed {
            allow: "POST",
            description: "/token only accepts POST".to_string(),
        });
    }

    let form = std::str::from_utf8(body)
        .map(parse_form)
        .map_err(|_| ApiError::invalid_request("token request body must be UTF-8 form data"))?;

    if form.get("grant_type").map(String::as_str) != Some(CLIENT_CREDENTIALS) {
        return Err(ApiError::BadRequest {
            code: ErrorCode::UnsupportedGrantType,
            description: "grant_type must be client_credentials".to_string(),
        });
    }

    let (client_id, client_secret) = client_credentials(&form, headers)?;
    if !gatekeeper.client_credentials_match(&client_id, &client_secret) {
        debug!("Token request with invalid client credentials");
        return Err(ApiError::unauthorized(
            ErrorCode::InvalidClient,
            "client credentials are invalid",
            Challenge::Basic,
        ));
    }

    let ttl = gatekeeper.settings().token_ttl;
    let issued = gatekeeper.tokens().issue(ttl);
    info!(client_id = %client_id, expires_in = ttl.as_secs(), "Issued access token");

    let mut payload = json!({
        "access_token": issued.access_token,
        "token_type": "Bearer",
        "expires_in": ttl.as_secs(),
    });
    if let Some(scope) = form.get("scope").filter(|s| !s.is_empty()) {
        payload["scope"] = Value::String(scope.clone());
    }

    let mut response = json_response(StatusCode::OK, &payload, false);
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    Ok(response)
}

/// First value of each form key; blank values are kept.
fn parse_form(body: &str) -> HashMap<String, String> {
    let mut form = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(body.as_bytes()) {
        form.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }
    form
}

fn client_credentials(
    form: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Result<(String, String), ApiError> {
    let form_id = form.get("client_id").map_or("", String::as_str);
    let form_secret = form.get("client_secret").map_or("", String::as_str);

    let header = authorization_header(headers);
    let basic = parse_basic_header(header.as_deref())
        .map_err(|e| ApiError::invalid_request(e.to_string()))?;

    match basic {
        Some(creds) if !creds.username.is_empty() => {
            if !form_id.is_empty() && form_id != creds.username {
                return Err(ApiError::invalid_request(
                    "client_id conflicts between basic auth and form body",
                ));
            }
            if !form_secret.is_empty() && form_secret != creds.password {
                return Err(ApiError::invalid_request(
                    "client_secret conflicts between basic auth and form body",
                ));
            }
            Ok((creds.username, creds.password))
        }
        _ => Ok((form_id.to_string(), form_secret.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    use super::*;
    use crate::auth::AuthSettings;
    use crate::token::TokenRegistry;

    fn gatekeeper() -> Gatekeeper {
        Gatekeeper::new(
            AuthSettings {
                oauth2: true,
                basic: false,
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                basic_username: "client".to_string(),
                basic_password: "secret".to_string(),
                token_ttl: Duration::from_secs(120),
            },
            Arc::new(TokenRegistry::new()),
        )
    }

    fn basic_header(user_pass: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", STANDARD.encode(user_pass))).unwrap(),
        );
        headers
    }

    fn post(gk: &Gatekeeper, headers: &HeaderMap, body: &str) -> Result<Response, ApiError> {
        issue_token(gk, &Method::POST, headers, body.as_bytes())
    }

    fn code(result: Result<Response, ApiError>) -> ErrorCode {
        result.unwrap_err().code()
    }

    #[test]
    fn form_credentials_issue_a_registered_token() {
        let gk = gatekeeper();
        let response = post(
            &gk,
            &HeaderMap::new(),
            "grant_type=client_credentials&client_id=client&client_secret=secret",
        )
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        assert_eq!(response.headers()[header::PRAGMA], "no-cache");
        assert_eq!(gk.tokens().len(), 1);
    }

    #[test]
    fn basic_header_credentials_are_accepted() {
        let gk = gatekeeper();
        let response = post(&gk, &basic_header("client:secret"), "grant_type=client_credentials");
        assert!(response.is_ok());
    }

    #[test]
    fn conflicting_sources_are_rejected() {
        let gk = gatekeeper();
        assert_eq!(
            code(post(
                &gk,
                &basic_header("client:secret"),
                "grant_type=client_credentials&client_id=someone-else"
            )),
            ErrorCode::InvalidRequest
        );
        assert_eq!(
            code(post(
                &gk,
                &basic_header("client:secret"),
                "grant_type=client_credentials&client_secret=other"
            )),
            ErrorCode::InvalidRequest
        );
    }

    #[test]
    fn empty_basic_username_falls_back_to_form() {
        let gk = gatekeeper();
        let response = post(
            &gk,
            &basic_header(":ignored"),
            "grant_type=client_credentials&client_id=client&client_secret=secret",
        );
        assert!(response.is_ok());
    }

    #[test]
    fn malformed_basic_header_is_a_bad_request() {
        let gk = gatekeeper();
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic ***"));

        let err = post(&gk, &headers, "grant_type=client_credentials").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[test]
    fn non_ascii_basic_header_is_a_bad_request() {
        let gk = gatekeeper();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_bytes(b"Basic \xff\xfe").unwrap(),
        );

        let err = post(&gk, &headers, "grant_type=client_credentials").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[test]
    fn wrong_grant_type_is_unsupported() {
        let gk = gatekeeper();
        assert_eq!(
            code(post(&gk, &HeaderMap::new(), "grant_type=password&client_id=client")),
            ErrorCode::UnsupportedGrantType
        );
        assert_eq!(
            code(post(&gk, &HeaderMap::new(), "")),
            ErrorCode::UnsupportedGrantType
        );
    }

    #[test]
    fn wrong_credentials_are_invalid_client() {
        let gk = gatekeeper();
        let err = post(
            &gk,
            &HeaderMap::new(),
            "grant_type=client_credentials&client_id=client&client_secret=nope",
        )
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.code(), ErrorCode::InvalidClient);
        assert!(gk.tokens().is_empty());
    }

    #[test]
    fn non_utf8_body_is_invalid_request() {
        let gk = gatekeeper();
        let err = issue_token(&gk, &Method::POST, &HeaderMap::new(), &[0xff, 0xfe]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[test]
    fn non_post_is_method_not_allowed() {
        let gk = gatekeeper();
        let err = issue_token(&gk, &Method::GET, &HeaderMap::new(), b"").unwrap_err();
        assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn first_form_value_wins() {
        let form = parse_form("scope=a&scope=b&empty=&enc=a%20b+c");
        assert_eq!(form["scope"], "a");
        assert_eq!(form["empty"], "");
        assert_eq!(form["enc"], "a b c");
    }
}
