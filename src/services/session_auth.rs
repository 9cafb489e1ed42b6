// Session Auth
// Form login against the relay backend, producing the cookie for the realtime channel

use reqwest::header::{HeaderMap, LOCATION, SET_COOKIE};
use reqwest::redirect::Policy;
use std::time::Duration;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Log in with username/password and return the `Cookie` header value
pub async fn login(server_url: &str, username: &str, password: &str) -> Result<String, String> {
    let url = format!("{}/login", server_url.trim_end_matches('/'));

    let client = reqwest::Client::builder()
        .redirect(Policy::none())
        .timeout(LOGIN_TIMEOUT)
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {e}"))?;

    log::info!("Logging in to {url} as {username}");
    let response = client
        .post(&url)
        .form(&[("username", username), ("password", password)])
        .send()
        .await
        .map_err(|e| format!("Login request failed: {e}"))?;

    let status = response.status();
    if !status.is_redirection() {
        // the login form is re-rendered on bad credentials
        return Err(format!("Login rejected (HTTP {})", status.as_u16()));
    }
    if redirects_to_login(response.headers()) {
        return Err("Login rejected: redirected back to login".to_string());
    }

    let cookie = extract_session_cookie(response.headers())
        .ok_or_else(|| "Login succeeded but no session cookie was set".to_string())?;
    log::info!("Logged in to relay as {username}");
    Ok(cookie)
}

fn redirects_to_login(headers: &HeaderMap) -> bool {
    headers
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(|location| {
            let path = location.split('?').next().unwrap_or(location);
            path.trim_end_matches('/').ends_with("/login")
        })
        .unwrap_or(false)
}

/// Join the name=value part of every Set-Cookie header into one Cookie header
pub fn extract_session_cookie(headers: &HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('=') && !pair.starts_with('='))
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}
