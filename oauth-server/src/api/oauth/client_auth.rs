use base64::{engine::general_purpose::STANDARD, Engine as _};
use http::header::AUTHORIZATION;
use http::HeaderMap;
use oauth_core::{ClientCredentials, OAuthError};

/// Undoes the `application/x-www-form-urlencoded` encoding clients apply to
/// their id and secret before Basic authentication (RFC 6749 section 2.3.1)
fn form_decode(part: &str) -> Option<String> {
    urlencoding::decode(&part.replace('+', " "))
        .ok()
        .map(|decoded| decoded.into_owned())
}

fn basic_credentials(headers: &HeaderMap) -> Result<Option<ClientCredentials>, OAuthError> {
    let Some(header) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let malformed = || OAuthError::InvalidClient("malformed basic authorization header".to_string());

    let value = header.to_str().map_err(|_| malformed())?;
    let Some((scheme, encoded)) = value.split_once(' ') else {
        return Err(malformed());
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return Ok(None);
    }
    let decoded = STANDARD.decode(encoded.trim()).map_err(|_| malformed())?;
    let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
    let (client_id, client_secret) = decoded.split_once(':').ok_or_else(malformed)?;
    let client_id = form_decode(client_id).ok_or_else(malformed)?;
    let client_secret = form_decode(client_secret).ok_or_else(malformed)?;
    Ok(Some(ClientCredentials::new(client_id, client_secret)))
}

/// Reads the client's credentials from HTTP Basic authentication
/// (`client_secret_basic`) or from the body (`client_secret_post`).
///
/// Using both methods in one request is rejected.
pub fn client_credentials(
    headers: &HeaderMap,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> Result<ClientCredentials, OAuthError> {
    let client_id = client_id.filter(|id| !id.is_empty());
    let client_secret = client_secret.filter(|secret| !secret.is_empty());

    if let Some(credentials) = basic_credentials(headers)? {
        if client_secret.is_some() {
            return Err(OAuthError::InvalidRequest(
                "client credentials must be sent with one authentication method".to_string(),
            ));
        }
        if client_id.is_some_and(|id| id != credentials.client_id) {
            return Err(OAuthError::InvalidRequest(
                "client_id does not match the authenticated client".to_string(),
            ));
        }
        return Ok(credentials);
    }

    match (client_id, client_secret) {
        (Some(id), Some(secret)) => Ok(ClientCredentials::new(id, secret)),
        _ => Err(OAuthError::InvalidClient(
            "client authentication required".to_string(),
        )),
    }
}
