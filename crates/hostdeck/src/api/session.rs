//! Browser session identity.
//!
//! Every request carries a session id in the `hostdeck_session` cookie. When
//! the cookie is missing or malformed a fresh UUID is issued and set on the
//! response. Handlers read the id from request extensions.

use axum::{
    extract::Request,
    http::{HeaderValue, header},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "hostdeck_session";

/// Session id attached to each request by [`session_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Extract a cookie value from a raw `Cookie` header.
fn cookie_from_header(cookie_header: &str, name: &str) -> Option<String> {
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=')
            && key == name
        {
            return Some(value.to_string());
        }
    }
    None
}

fn session_from_request(req: &Request) -> Option<String> {
    req.headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| cookie_from_header(value, SESSION_COOKIE))
        .filter(|value| Uuid::parse_str(value).is_ok())
}

pub async fn session_middleware(mut req: Request, next: Next) -> Response {
    let (session_id, issued) = match session_from_request(&req) {
        Some(id) => (id, false),
        None => {
            let id = Uuid::new_v4().to_string();
            debug!("Issuing new session {}", id);
            (id, true)
        }
    };

    req.extensions_mut().insert(SessionId(session_id.clone()));
    let mut response = next.run(req).await;

    if issued {
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            SESSION_COOKIE, session_id
        );
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => warn!("Invalid session cookie header: {}", e),
        }
    }

    response
}
