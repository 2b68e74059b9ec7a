//! Request guards shared by the route handlers.

use crate::mail::MailboxCredentials;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket_okapi::request::OpenApiFromRequest;

/// Mailbox access token from `Authorization: Bearer <token>`.
///
/// The token is only forwarded to the mailbox provider; it is never stored
/// or logged.
#[derive(OpenApiFromRequest)]
pub struct MailboxToken(MailboxCredentials);

impl MailboxToken {
    pub fn into_credentials(self) -> MailboxCredentials {
        self.0
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for MailboxToken {
    type Error = &'static str;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match request
            .headers()
            .get_one("Authorization")
            .and_then(bearer_token)
        {
            Some(token) => Outcome::Success(MailboxToken(MailboxCredentials::new(token))),
            None => Outcome::Error((Status::Unauthorized, "missing bearer token")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::bearer_token;

    #[test]
    fn accepts_bearer_scheme_case_insensitively() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
    }

    #[test]
    fn rejects_other_schemes_and_empty_tokens() {
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer"), None);
    }
}
