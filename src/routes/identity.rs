use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{error::AppError, state::room::ActorIdentity};

/// Header carrying an authenticated account id, set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying a guest key for callers without an account.
pub const GUEST_KEY_HEADER: &str = "x-guest-key";

const MAX_IDENTITY_LEN: usize = 128;

/// Caller identity resolved from request headers. A user id wins over a guest key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub ActorIdentity);

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| -> Result<Option<String>, AppError> {
            let Some(value) = parts.headers.get(name) else {
                return Ok(None);
            };
            let value = value
                .to_str()
                .map_err(|_| AppError::Unauthorized(format!("header `{name}` is not valid text")))?
                .trim();
            if value.is_empty() {
                return Ok(None);
            }
            if value.len() > MAX_IDENTITY_LEN {
                return Err(AppError::Unauthorized(format!("header `{name}` is too long")));
            }
            Ok(Some(value.to_owned()))
        };

        let user_id = header(USER_ID_HEADER)?;
        let guest_key = header(GUEST_KEY_HEADER)?;
        ActorIdentity::from_parts(user_id, guest_key)
            .map(Actor)
            .ok_or_else(|| {
                AppError::Unauthorized(format!(
                    "missing identity header `{USER_ID_HEADER}` or `{GUEST_KEY_HEADER}`"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(headers: &[(&str, &str)]) -> Result<Actor, AppError> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Actor::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn user_id_wins_over_guest_key() {
        let actor = extract(&[(USER_ID_HEADER, "u1"), (GUEST_KEY_HEADER, "g1")])
            .await
            .unwrap();
        assert_eq!(actor.0, ActorIdentity::User("u1".into()));

        let actor = extract(&[(GUEST_KEY_HEADER, " g1 ")]).await.unwrap();
        assert_eq!(actor.0, ActorIdentity::Guest("g1".into()));
    }

    #[tokio::test]
    async fn missing_or_blank_identity_is_rejected() {
        assert!(matches!(extract(&[]).await, Err(AppError::Unauthorized(_))));
        assert!(matches!(
            extract(&[(GUEST_KEY_HEADER, "  ")]).await,
            Err(AppError::Unauthorized(_))
        ));
    }
}
