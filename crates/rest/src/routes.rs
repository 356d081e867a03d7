//! Route-key derivation.
//!
//! Rate limits are scoped by route *template*, not by concrete URL: all
//! message deletions under one channel share a limit, while the same
//! operation against another channel does not. The key therefore collapses
//! every numeric path segment to `:id` except the major parameter — the id
//! directly under `channels`, `guilds` or `webhooks` (and, for webhooks,
//! the token segment that follows it), which stays literal.

use reqwest::Method;

/// Path roots whose first id segment is the major parameter.
const MAJOR_ROOTS: [&str; 3] = ["channels", "guilds", "webhooks"];

/// One outbound route: method plus concrete path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    pub method: Method,
    pub path: String,
}

impl Route {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    /// The rate-limit route key: `"{METHOD} {normalized_path}"`.
    pub fn key(&self) -> String {
        format!("{} {}", self.method, normalize(&self.path))
    }
}

fn is_id(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Collapse non-major numeric segments to `:id`.
fn normalize(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let mut out: Vec<String> = Vec::with_capacity(segments.len());

    for (i, seg) in segments.iter().enumerate() {
        // Webhook tokens are part of the major parameter: the segment
        // following a literal webhook id stays as-is even if numeric.
        let after_webhook_id =
            i >= 2 && segments[i - 2] == "webhooks" && is_id(segments[i - 1]);

        if !is_id(seg) || after_webhook_id {
            out.push((*seg).to_string());
            continue;
        }

        let major = i >= 1 && MAJOR_ROOTS.contains(&segments[i - 1]);
        if major {
            out.push((*seg).to_string());
        } else {
            out.push(":id".to_string());
        }
    }

    out.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_channel_shares_a_key() {
        let a = Route::new(Method::DELETE, "/channels/123/messages/456").key();
        let b = Route::new(Method::DELETE, "/channels/123/messages/789").key();
        assert_eq!(a, b);
        assert_eq!(a, "DELETE /channels/123/messages/:id");
    }

    #[test]
    fn different_channel_does_not() {
        let a = Route::new(Method::DELETE, "/channels/123/messages/456").key();
        let c = Route::new(Method::DELETE, "/channels/999/messages/456").key();
        assert_ne!(a, c);
    }

    #[test]
    fn method_is_part_of_the_key() {
        let del = Route::new(Method::DELETE, "/channels/123/messages/456").key();
        let get = Route::new(Method::GET, "/channels/123/messages/456").key();
        assert_ne!(del, get);
    }

    #[test]
    fn guild_id_is_major() {
        let key = Route::new(Method::GET, "/guilds/42/members/77").key();
        assert_eq!(key, "GET /guilds/42/members/:id");
    }

    #[test]
    fn webhook_id_and_token_stay_literal() {
        let key = Route::new(Method::POST, "/webhooks/555/abcDEF123/messages/42").key();
        assert_eq!(key, "POST /webhooks/555/abcDEF123/messages/:id");
    }

    #[test]
    fn non_major_numeric_roots_collapse() {
        let key = Route::new(Method::PUT, "/users/123/relationships/456").key();
        assert_eq!(key, "PUT /users/:id/relationships/:id");
    }
}
