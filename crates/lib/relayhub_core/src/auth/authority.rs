//! Token authority: authorization codes, token exchange, validation,
//! revocation.
//!
//! Parsed token fields are never trusted on their own. Every decision ends in
//! an equality check against what the credential store holds for the user.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::token::{BearerToken, TokenKind, generate_authorization_code};
use super::{AuthError, CredentialVerifier};
use crate::config::RelayConfig;
use crate::models::AuthorizationGrant;
use crate::store::{CredentialStore, TokenPair};

/// Proof that a bearer token matched the stored access token of `user_id`.
///
/// Only [`TokenAuthority::authenticate_bearer`] constructs it, so holding one
/// means the gate was passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    user_id: String,
}

impl Authenticated {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

/// Issues and validates the bearer credentials of linked accounts.
pub struct TokenAuthority {
    config: RelayConfig,
    store: Arc<dyn CredentialStore>,
    verifier: Arc<dyn CredentialVerifier>,
}

impl TokenAuthority {
    pub fn new(
        config: RelayConfig,
        store: Arc<dyn CredentialStore>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            config,
            store,
            verifier,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Authorize step: the client must be the configured one and the redirect
    /// target must be on the allow-list.
    pub fn check_authorization_request(
        &self,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<(), AuthError> {
        if client_id != self.config.client_id {
            debug!(client_id, "authorize: unknown client");
            return Err(AuthError::Forbidden);
        }
        if !self.config.redirect_uris.iter().any(|u| u == redirect_uri) {
            debug!(redirect_uri, "authorize: redirect target not allowed");
            return Err(AuthError::Forbidden);
        }
        Ok(())
    }

    /// Check an email/password pair, returning the user id.
    ///
    /// Unknown email and wrong password fail the same way.
    pub async fn authenticate_user(&self, email: &str, password: &str) -> Result<String, AuthError> {
        let Some((user_id, hash)) = self.store.find_by_email(email).await? else {
            debug!("login: unknown email");
            return Err(AuthError::InvalidCredentials);
        };
        if !self.verifier.verify(password, &hash)? {
            debug!(user_id, "login: password mismatch");
            return Err(AuthError::InvalidCredentials);
        }
        Ok(user_id)
    }

    /// Mint an authorization code bound to `(user, client, redirect)`,
    /// replacing any code still pending for the user.
    pub async fn issue_authorization_code(
        &self,
        user_id: &str,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<String, AuthError> {
        let grant = AuthorizationGrant {
            code: generate_authorization_code(),
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            issued_at: Utc::now(),
        };
        self.store.set_authorization(user_id, &grant).await?;
        info!(user_id, client_id, "authorization code issued");
        Ok(grant.code)
    }

    /// `authorization_code` grant. Single use: the code is consumed by the
    /// same conditional write that stores the new tokens.
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
    ) -> Result<TokenPair, AuthError> {
        let Some((user_id, grant)) = self.store.find_by_authorization_code(code).await? else {
            debug!("token: unknown authorization code");
            return Err(AuthError::InvalidGrant);
        };

        if grant.is_expired(self.config.auth_code_ttl, Utc::now()) {
            debug!(user_id, "token: authorization code expired");
            return Err(AuthError::InvalidGrant);
        }
        if client_id != grant.client_id
            || client_id != self.config.client_id
            || client_secret != self.config.client_secret
            || redirect_uri != grant.redirect_uri
        {
            debug!(user_id, client_id, "token: client or redirect mismatch");
            return Err(AuthError::InvalidGrant);
        }

        let tokens = TokenPair {
            access_token: BearerToken::mint(TokenKind::Access, &grant.client_id, &user_id)
                .to_string(),
            refresh_token: BearerToken::mint(TokenKind::Refresh, &grant.client_id, &user_id)
                .to_string(),
        };
        if !self.store.finalize_tokens(&user_id, code, &tokens).await? {
            debug!(user_id, "token: authorization code already consumed");
            return Err(AuthError::InvalidGrant);
        }

        info!(user_id, "account linked");
        Ok(tokens)
    }

    /// `refresh_token` grant. The new access token replaces the old one
    /// immediately.
    pub async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<String, AuthError> {
        let Some(token) = BearerToken::parse(refresh_token) else {
            debug!("token: malformed refresh token");
            return Err(AuthError::InvalidGrant);
        };

        if token.kind != TokenKind::Refresh
            || token.client_id != self.config.client_id
            || client_id != token.client_id
            || client_secret != self.config.client_secret
        {
            debug!(user_id = %token.user_id, "token: refresh token client mismatch");
            return Err(AuthError::InvalidGrant);
        }

        let access_token =
            BearerToken::mint(TokenKind::Access, &token.client_id, &token.user_id).to_string();
        if !self
            .store
            .rotate_access_token(&token.user_id, refresh_token, &access_token)
            .await?
        {
            debug!(user_id = %token.user_id, "token: refresh token not on record");
            return Err(AuthError::InvalidGrant);
        }

        info!(user_id = %token.user_id, "access token rotated");
        Ok(access_token)
    }

    /// True iff `token` is the access token currently stored for `user_id`.
    pub async fn validate_access_token(&self, user_id: &str, token: &str) -> Result<bool, AuthError> {
        Ok(self.store.access_token_matches(user_id, token).await?)
    }

    /// Gate for fulfillment and sync-trigger requests.
    pub async fn authenticate_bearer(&self, token: &str) -> Result<Authenticated, AuthError> {
        let Some(parsed) = BearerToken::parse(token) else {
            debug!("bearer: malformed token");
            return Err(AuthError::Unauthorized);
        };
        if parsed.kind != TokenKind::Access || parsed.client_id != self.config.client_id {
            debug!(user_id = %parsed.user_id, "bearer: wrong kind or client");
            return Err(AuthError::Unauthorized);
        }
        if !self.validate_access_token(&parsed.user_id, token).await? {
            debug!(user_id = %parsed.user_id, "bearer: token not on record");
            return Err(AuthError::Unauthorized);
        }
        Ok(Authenticated {
            user_id: parsed.user_id,
        })
    }

    /// Drop all tokens and any pending code; disable report-state. Idempotent.
    pub async fn revoke(&self, user_id: &str) -> Result<(), AuthError> {
        self.store.clear_tokens(user_id).await?;
        info!(user_id, "tokens revoked");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::BcryptVerifier;
    use crate::models::NewAccount;
    use crate::store::MemoryStore;

    pub(crate) const CLIENT_ID: &str = "relay-client";
    pub(crate) const CLIENT_SECRET: &str = "relay-secret";
    pub(crate) const REDIRECT_URI: &str = "https://oauth-redirect.example/r/relayhub";

    pub(crate) fn test_config() -> RelayConfig {
        RelayConfig {
            client_id: CLIENT_ID.into(),
            client_secret: CLIENT_SECRET.into(),
            redirect_uris: vec![REDIRECT_URI.into()],
            auth_code_ttl: Duration::from_secs(600),
            report_state_max_age: None,
            homegraph_credentials: None,
            login_page_url: "/login".into(),
        }
    }

    pub(crate) async fn setup() -> (Arc<MemoryStore>, TokenAuthority, String) {
        let store = Arc::new(MemoryStore::new());
        let user_id = store
            .create_account(NewAccount {
                email: "ada@example.com".into(),
                password_hash: bcrypt::hash("correct horse", 4).unwrap(),
                device_jwt_psk: Some("device-psk".into()),
            })
            .await
            .unwrap();
        let authority = TokenAuthority::new(test_config(), store.clone(), Arc::new(BcryptVerifier));
        (store, authority, user_id)
    }

    /// Run the full link flow and return the issued tokens.
    pub(crate) async fn link(authority: &TokenAuthority, user_id: &str) -> TokenPair {
        let code = authority
            .issue_authorization_code(user_id, CLIENT_ID, REDIRECT_URI)
            .await
            .unwrap();
        authority
            .exchange_authorization_code(&code, CLIENT_ID, CLIENT_SECRET, REDIRECT_URI)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn authorization_code_is_single_use() {
        let (store, authority, user_id) = setup().await;
        let code = authority
            .issue_authorization_code(&user_id, CLIENT_ID, REDIRECT_URI)
            .await
            .unwrap();

        let tokens = authority
            .exchange_authorization_code(&code, CLIENT_ID, CLIENT_SECRET, REDIRECT_URI)
            .await
            .unwrap();
        assert!(tokens.access_token.starts_with(&format!("access$@${CLIENT_ID}$@${user_id}$@$")));
        assert!(tokens.refresh_token.starts_with("refresh$@$"));

        let again = authority
            .exchange_authorization_code(&code, CLIENT_ID, CLIENT_SECRET, REDIRECT_URI)
            .await;
        assert!(matches!(again, Err(AuthError::InvalidGrant)));

        let account = store.account(&user_id).unwrap();
        assert!(account.authorization.is_none());
        assert!(account.report_state);
    }

    #[tokio::test]
    async fn exchange_rejects_mismatched_binding() {
        let (_store, authority, user_id) = setup().await;
        let code = authority
            .issue_authorization_code(&user_id, CLIENT_ID, REDIRECT_URI)
            .await
            .unwrap();

        for (client, secret, redirect) in [
            ("other-client", CLIENT_SECRET, REDIRECT_URI),
            (CLIENT_ID, "wrong-secret", REDIRECT_URI),
            (CLIENT_ID, CLIENT_SECRET, "https://evil.example/r"),
        ] {
            let result = authority
                .exchange_authorization_code(&code, client, secret, redirect)
                .await;
            assert!(matches!(result, Err(AuthError::InvalidGrant)));
        }

        // A failed attempt does not burn the code.
        assert!(
            authority
                .exchange_authorization_code(&code, CLIENT_ID, CLIENT_SECRET, REDIRECT_URI)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn expired_code_is_rejected() {
        let (store, mut authority, user_id) = setup().await;
        authority.config.auth_code_ttl = Duration::from_secs(60);
        store
            .set_authorization(
                &user_id,
                &AuthorizationGrant {
                    code: "old-code".into(),
                    client_id: CLIENT_ID.into(),
                    redirect_uri: REDIRECT_URI.into(),
                    issued_at: Utc::now() - chrono::Duration::minutes(5),
                },
            )
            .await
            .unwrap();

        let result = authority
            .exchange_authorization_code("old-code", CLIENT_ID, CLIENT_SECRET, REDIRECT_URI)
            .await;
        assert!(matches!(result, Err(AuthError::InvalidGrant)));
    }

    #[tokio::test]
    async fn new_code_replaces_pending_one() {
        let (_store, authority, user_id) = setup().await;
        let first = authority
            .issue_authorization_code(&user_id, CLIENT_ID, REDIRECT_URI)
            .await
            .unwrap();
        let _second = authority
            .issue_authorization_code(&user_id, CLIENT_ID, REDIRECT_URI)
            .await
            .unwrap();

        let result = authority
            .exchange_authorization_code(&first, CLIENT_ID, CLIENT_SECRET, REDIRECT_URI)
            .await;
        assert!(matches!(result, Err(AuthError::InvalidGrant)));
    }

    #[tokio::test]
    async fn refresh_rotates_access_token_without_grace() {
        let (_store, authority, user_id) = setup().await;
        let tokens = link(&authority, &user_id).await;
        assert!(
            authority
                .validate_access_token(&user_id, &tokens.access_token)
                .await
                .unwrap()
        );

        let fresh = authority
            .exchange_refresh_token(&tokens.refresh_token, CLIENT_ID, CLIENT_SECRET)
            .await
            .unwrap();
        assert_ne!(fresh, tokens.access_token);
        assert!(authority.validate_access_token(&user_id, &fresh).await.unwrap());
        assert!(
            !authority
                .validate_access_token(&user_id, &tokens.access_token)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn refresh_checks_embedded_client_independently() {
        let (store, authority, user_id) = setup().await;
        // A stored refresh token whose embedded client is not the configured one.
        let foreign = BearerToken::mint(TokenKind::Refresh, "other-client", &user_id).to_string();
        let code = authority
            .issue_authorization_code(&user_id, CLIENT_ID, REDIRECT_URI)
            .await
            .unwrap();
        store
            .finalize_tokens(
                &user_id,
                &code,
                &TokenPair {
                    access_token: "a".into(),
                    refresh_token: foreign.clone(),
                },
            )
            .await
            .unwrap();

        for client in ["other-client", CLIENT_ID] {
            let result = authority
                .exchange_refresh_token(&foreign, client, CLIENT_SECRET)
                .await;
            assert!(matches!(result, Err(AuthError::InvalidGrant)));
        }
    }

    #[tokio::test]
    async fn refresh_rejects_forged_and_misused_tokens() {
        let (_store, authority, user_id) = setup().await;
        let tokens = link(&authority, &user_id).await;

        let forged = BearerToken::mint(TokenKind::Refresh, CLIENT_ID, &user_id).to_string();
        let cases = [
            (forged.as_str(), CLIENT_ID, CLIENT_SECRET),
            (tokens.access_token.as_str(), CLIENT_ID, CLIENT_SECRET),
            (tokens.refresh_token.as_str(), CLIENT_ID, "wrong-secret"),
            ("not-a-token", CLIENT_ID, CLIENT_SECRET),
        ];
        for (token, client, secret) in cases {
            let result = authority.exchange_refresh_token(token, client, secret).await;
            assert!(matches!(result, Err(AuthError::InvalidGrant)));
        }
    }

    #[tokio::test]
    async fn bearer_gate_requires_stored_access_token() {
        let (_store, authority, user_id) = setup().await;
        let tokens = link(&authority, &user_id).await;

        let ok = authority.authenticate_bearer(&tokens.access_token).await.unwrap();
        assert_eq!(ok.user_id(), user_id);

        let forged = BearerToken::mint(TokenKind::Access, CLIENT_ID, &user_id).to_string();
        for token in [forged.as_str(), tokens.refresh_token.as_str(), "garbage"] {
            assert!(matches!(
                authority.authenticate_bearer(token).await,
                Err(AuthError::Unauthorized)
            ));
        }
    }

    #[tokio::test]
    async fn revoke_is_idempotent_and_invalidates() {
        let (store, authority, user_id) = setup().await;
        let tokens = link(&authority, &user_id).await;

        authority.revoke(&user_id).await.unwrap();
        let after_once = store.account(&user_id).unwrap();
        authority.revoke(&user_id).await.unwrap();
        let after_twice = store.account(&user_id).unwrap();

        assert!(
            !authority
                .validate_access_token(&user_id, &tokens.access_token)
                .await
                .unwrap()
        );
        assert!(
            authority
                .exchange_refresh_token(&tokens.refresh_token, CLIENT_ID, CLIENT_SECRET)
                .await
                .is_err()
        );
        assert!(!after_twice.report_state);
        assert_eq!(after_once.access_token, after_twice.access_token);
        assert_eq!(after_once.refresh_token, after_twice.refresh_token);
    }

    #[tokio::test]
    async fn login_checks_password_and_authorize_checks_client() {
        let (_store, authority, user_id) = setup().await;
        assert_eq!(
            authority
                .authenticate_user("ada@example.com", "correct horse")
                .await
                .unwrap(),
            user_id
        );
        assert!(matches!(
            authority.authenticate_user("ada@example.com", "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            authority.authenticate_user("nobody@example.com", "x").await,
            Err(AuthError::InvalidCredentials)
        ));

        assert!(authority.check_authorization_request(CLIENT_ID, REDIRECT_URI).is_ok());
        assert!(matches!(
            authority.check_authorization_request("other", REDIRECT_URI),
            Err(AuthError::Forbidden)
        ));
        assert!(matches!(
            authority.check_authorization_request(CLIENT_ID, "https://evil.example"),
            Err(AuthError::Forbidden)
        ));
    }
}
