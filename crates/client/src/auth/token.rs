//! Persisted auth token and the identity derived from it.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use marketstall_core::{Role, UserId};

use crate::api::LoginResponse;
use crate::storage::{self, KeyValueStorage, keys};

/// The authenticated session as persisted locally.
///
/// `token.is_some()` is the definition of "logged in".
#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    pub token: Option<SecretString>,
    pub role: Option<Role>,
    pub account_status: Option<String>,
    pub user_id: Option<UserId>,
    pub username: Option<String>,
    pub email: Option<String>,
}

impl AuthSession {
    /// Whether this session carries a token.
    #[must_use]
    pub const fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    /// Build a session from a login response, filling identity gaps from the
    /// token's claims.
    #[must_use]
    pub fn from_login(response: LoginResponse) -> Self {
        let claims = TokenClaims::decode(&response.token).unwrap_or_default();
        Self {
            role: response.role.or(claims.role),
            account_status: response.account_status.or(claims.account_status),
            user_id: response.user_id.or(claims.user_id),
            username: response.username.or(claims.username),
            email: response.email,
            token: Some(SecretString::from(response.token)),
        }
    }
}

/// Identity claims read from a JWT payload.
///
/// The signature is not checked; the backend does that. These values only
/// drive UI decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TokenClaims {
    role: Option<Role>,
    account_status: Option<String>,
    user_id: Option<UserId>,
    username: Option<String>,
}

impl TokenClaims {
    fn decode(token: &str) -> Option<Self> {
        let payload = token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;

        let role = value
            .get("role")
            .and_then(serde_json::Value::as_str)
            .or_else(|| {
                value
                    .get("roles")
                    .and_then(serde_json::Value::as_array)
                    .and_then(|roles| roles.first())
                    .and_then(serde_json::Value::as_str)
            })
            .and_then(|raw| raw.parse().ok());

        // `sub` is the user id when numeric, the username otherwise.
        let subject = value.get("sub").and_then(|sub| match sub {
            serde_json::Value::Number(n) => n.as_i64().map(Subject::Id),
            serde_json::Value::String(s) => Some(
                s.parse()
                    .map_or_else(|_| Subject::Name(s.clone()), Subject::Id),
            ),
            _ => None,
        });

        let user_id = ["userId", "id"]
            .iter()
            .find_map(|key| value.get(key).and_then(serde_json::Value::as_i64))
            .or(match subject {
                Some(Subject::Id(id)) => Some(id),
                _ => None,
            })
            .map(UserId::new);

        let username = value
            .get("username")
            .and_then(serde_json::Value::as_str)
            .map(String::from)
            .or(match subject {
                Some(Subject::Name(name)) => Some(name),
                _ => None,
            });

        Some(Self {
            role,
            account_status: value
                .get("accountStatus")
                .and_then(serde_json::Value::as_str)
                .map(String::from),
            user_id,
            username,
        })
    }
}

enum Subject {
    Id(i64),
    Name(String),
}

/// Reads and writes the session keys in local storage.
///
/// Cheap to clone. Never fails: storage errors are logged by the storage
/// helpers and read back as "not logged in".
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn KeyValueStorage>,
}

impl TokenStore {
    /// Create a token store over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    /// Persist every field of `session`, erasing keys for absent fields.
    pub fn save(&self, session: &AuthSession) {
        let storage = self.storage.as_ref();
        let user_id = session.user_id.map(|id| id.to_string());
        let role = session.role.map(|role| role.as_str());
        let fields: [(&str, Option<&str>); 6] = [
            (
                keys::AUTH_TOKEN,
                session.token.as_ref().map(|token| token.expose_secret()),
            ),
            (keys::USER_ROLE, role),
            (keys::ACCOUNT_STATUS, session.account_status.as_deref()),
            (keys::USER_ID, user_id.as_deref()),
            (keys::USERNAME, session.username.as_deref()),
            (keys::USER_EMAIL, session.email.as_deref()),
        ];

        for (key, value) in fields {
            match value {
                Some(value) => storage::write_string(storage, key, value),
                None => storage::erase(storage, key),
            }
        }
        debug!("Session saved");
    }

    /// Erase every session key.
    pub fn clear(&self) {
        for key in keys::SESSION {
            storage::erase(self.storage.as_ref(), key);
        }
        debug!("Session cleared");
    }

    /// Current persisted session. Unreadable or malformed fields read as absent.
    #[must_use]
    pub fn get(&self) -> AuthSession {
        let storage = self.storage.as_ref();
        let Some(token) = self.token() else {
            return AuthSession::default();
        };

        AuthSession {
            token: Some(token),
            role: storage::read_string(storage, keys::USER_ROLE).and_then(|r| r.parse().ok()),
            account_status: storage::read_string(storage, keys::ACCOUNT_STATUS),
            user_id: storage::read_string(storage, keys::USER_ID).and_then(|id| id.parse().ok()),
            username: storage::read_string(storage, keys::USERNAME),
            email: storage::read_string(storage, keys::USER_EMAIL),
        }
    }

    /// Current bearer token, if any.
    #[must_use]
    pub fn token(&self) -> Option<SecretString> {
        storage::read_string(self.storage.as_ref(), keys::AUTH_TOKEN)
            .filter(|token| !token.is_empty())
            .map(SecretString::from)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::tests::BrokenStorage;
    use crate::storage::{MemoryStorage, NullStorage};

    fn jwt(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.signature")
    }

    fn session(token: &str) -> AuthSession {
        AuthSession {
            token: Some(SecretString::from(token.to_string())),
            role: Some(Role::Seller),
            account_status: Some("ACTIVE".to_string()),
            user_id: Some(UserId::new(12)),
            username: Some("ada".to_string()),
            email: Some("ada@example.com".to_string()),
        }
    }

    #[test]
    fn test_save_then_get() {
        let storage = Arc::new(MemoryStorage::new());
        let store = TokenStore::new(storage.clone());
        store.save(&session("tok-1"));

        let loaded = store.get();
        assert!(loaded.is_logged_in());
        assert_eq!(loaded.token.unwrap().expose_secret(), "tok-1");
        assert_eq!(loaded.role, Some(Role::Seller));
        assert_eq!(loaded.user_id, Some(UserId::new(12)));
        assert_eq!(loaded.account_status.as_deref(), Some("ACTIVE"));
        assert!(storage.contains(keys::USER_EMAIL));
    }

    #[test]
    fn test_clear_erases_every_session_key() {
        let storage = Arc::new(MemoryStorage::new());
        let store = TokenStore::new(storage.clone());
        store.save(&session("tok-1"));
        store.clear();

        assert!(!store.get().is_logged_in());
        for key in keys::SESSION {
            assert!(!storage.contains(key), "{key} left behind");
        }
    }

    #[test]
    fn test_fields_without_token_are_ignored() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(keys::USER_ROLE, "ADMIN").unwrap();
        let store = TokenStore::new(storage);

        let loaded = store.get();
        assert!(!loaded.is_logged_in());
        assert_eq!(loaded.role, None);
    }

    #[test]
    fn test_null_and_broken_storage_read_as_logged_out() {
        let null = TokenStore::new(Arc::new(NullStorage));
        null.save(&session("tok-1"));
        assert!(!null.get().is_logged_in());

        let broken = TokenStore::new(Arc::new(BrokenStorage));
        broken.save(&session("tok-1"));
        broken.clear();
        assert!(!broken.get().is_logged_in());
    }

    #[test]
    fn test_from_login_fills_gaps_from_claims() {
        let token = jwt(&serde_json::json!({
            "sub": "ada",
            "role": "ROLE_ADMIN",
            "userId": 44,
            "accountStatus": "ACTIVE",
        }));
        let session = AuthSession::from_login(LoginResponse {
            token,
            email: Some("ada@example.com".to_string()),
            ..LoginResponse::default()
        });

        assert_eq!(session.role, Some(Role::Admin));
        assert_eq!(session.user_id, Some(UserId::new(44)));
        assert_eq!(session.username.as_deref(), Some("ada"));
        assert_eq!(session.account_status.as_deref(), Some("ACTIVE"));
    }

    #[test]
    fn test_from_login_prefers_response_fields() {
        let token = jwt(&serde_json::json!({ "role": "ADMIN", "userId": 1 }));
        let session = AuthSession::from_login(LoginResponse {
            token,
            role: Some(Role::User),
            user_id: Some(UserId::new(2)),
            ..LoginResponse::default()
        });
        assert_eq!(session.role, Some(Role::User));
        assert_eq!(session.user_id, Some(UserId::new(2)));
    }

    #[test]
    fn test_numeric_subject_is_the_user_id() {
        let token = jwt(&serde_json::json!({ "sub": "31", "username": "grace" }));
        let session = AuthSession::from_login(LoginResponse {
            token,
            ..LoginResponse::default()
        });
        assert_eq!(session.user_id, Some(UserId::new(31)));
        assert_eq!(session.username.as_deref(), Some("grace"));

        let token = jwt(&serde_json::json!({ "sub": 32 }));
        let session = AuthSession::from_login(LoginResponse {
            token,
            ..LoginResponse::default()
        });
        assert_eq!(session.user_id, Some(UserId::new(32)));
        assert_eq!(session.username, None);
    }

    #[test]
    fn test_opaque_token_has_no_claims() {
        let session = AuthSession::from_login(LoginResponse {
            token: "opaque-token".to_string(),
            ..LoginResponse::default()
        });
        assert!(session.is_logged_in());
        assert_eq!(session.role, None);
    }
}
