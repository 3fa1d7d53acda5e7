// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post, put};
use axum::Router;
use chrono::{DateTime, Utc};
use rusty_paseto::core::Key;
use tower_http::timeout::TimeoutLayer;
use tracing::warn;

use aln_common::TokenCatalog;
use aln_rpc_common::{mint_auth_token, validate_auth_token, AuthToken, ErrorCode};

use crate::fabric::EventFabric;
use crate::offline::OfflineQueue;
use crate::sessions::EngineHandle;
use crate::video::VideoHandle;

pub mod handlers;
pub mod ws_connection;
pub mod ws_host;

/// HTTP handlers get this long, total.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Admin bearer-token authority: password check, minting, validation with a
/// short-lived verification cache in front of the signature check.
pub struct AuthContext {
    signing_key: Key<64>,
    public_key: Key<32>,
    admin_password: String,
    token_ttl: chrono::Duration,
    token_cache: papaya::HashMap<String, Instant>,
}

impl AuthContext {
    pub fn new(
        signing_key: Key<64>,
        public_key: Key<32>,
        admin_password: String,
        token_ttl: chrono::Duration,
    ) -> Self {
        Self {
            signing_key,
            public_key,
            admin_password,
            token_ttl,
            token_cache: papaya::HashMap::new(),
        }
    }

    pub fn check_password(&self, password: &str) -> bool {
        !self.admin_password.is_empty() && password == self.admin_password
    }

    pub fn mint(&self) -> AuthToken {
        mint_auth_token(&self.signing_key, self.token_ttl)
    }

    pub fn validate(&self, token: &AuthToken) -> Result<(), ErrorCode> {
        {
            let guard = self.token_cache.pin();
            if let Some(at) = guard.get(&token.0)
                && at.elapsed().as_secs() <= 60
            {
                return Ok(());
            }
        }
        validate_auth_token(&self.public_key, token).map_err(|e| {
            warn!("Rejected bearer token");
            e
        })?;
        let guard = self.token_cache.pin();
        guard.insert(token.0.clone(), Instant::now());
        Ok(())
    }
}

/// Shared state behind every HTTP route and socket handshake.
#[derive(Clone)]
pub struct WebHost {
    pub engine: EngineHandle,
    pub video: VideoHandle,
    pub fabric: Arc<EventFabric>,
    pub catalog: Arc<TokenCatalog>,
    pub offline: Arc<OfflineQueue>,
    pub auth: Arc<AuthContext>,
    pub started_at: DateTime<Utc>,
}

impl WebHost {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: EngineHandle,
        video: VideoHandle,
        fabric: Arc<EventFabric>,
        catalog: Arc<TokenCatalog>,
        offline: Arc<OfflineQueue>,
        auth: Arc<AuthContext>,
    ) -> Self {
        Self {
            engine,
            video,
            fabric,
            catalog,
            offline,
            auth,
            started_at: Utc::now(),
        }
    }
}

pub fn mk_routes(web_host: WebHost) -> eyre::Result<Router> {
    // The fabric must have its service listeners up before the wire handlers
    // exist; mounting the router is the HandlersReady transition.
    web_host.fabric.handlers_ready()?;

    let router = Router::new()
        .route("/api/admin/auth", post(handlers::admin_auth_handler))
        .route("/api/scan", post(handlers::scan_handler))
        .route(
            "/api/transaction/submit",
            post(handlers::transaction_submit_handler),
        )
        .route("/api/session", post(handlers::session_create_handler))
        .route("/api/session", put(handlers::session_update_handler))
        .route("/api/state", get(handlers::state_handler))
        .route("/api/tokens", get(handlers::tokens_handler))
        .route("/api/video/control", post(handlers::video_control_handler))
        .route("/api/state/status", get(handlers::status_handler))
        .route("/health", get(handlers::health_handler))
        .route("/ws", get(ws_host::ws_attach_handler))
        .layer(TimeoutLayer::new(HTTP_TIMEOUT))
        .with_state(web_host);

    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn auth_context(ttl: chrono::Duration) -> AuthContext {
        let signing = SigningKey::from_bytes(&[42u8; 32]);
        let verifying = signing.verifying_key();
        let mut signing_bytes = [0u8; 64];
        signing_bytes[..32].copy_from_slice(&signing.to_bytes());
        signing_bytes[32..].copy_from_slice(verifying.as_bytes());
        AuthContext::new(
            Key::from(&signing_bytes[..]),
            Key::from(&verifying.to_bytes()[..]),
            "sekrit".to_string(),
            ttl,
        )
    }

    #[test]
    fn minted_tokens_validate() {
        let auth = auth_context(chrono::Duration::hours(24));
        assert!(auth.check_password("sekrit"));
        assert!(!auth.check_password("wrong"));

        let token = auth.mint();
        assert!(auth.validate(&token).is_ok());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let auth = auth_context(chrono::Duration::hours(-1));
        let token = auth.mint();
        assert_eq!(auth.validate(&token), Err(ErrorCode::AuthInvalid));
    }

    #[test]
    fn tokens_from_another_key_are_rejected() {
        let minter = auth_context(chrono::Duration::hours(24));
        let token = minter.mint();

        let other_signing = SigningKey::from_bytes(&[7u8; 32]);
        let other_verifying = other_signing.verifying_key();
        let mut signing_bytes = [0u8; 64];
        signing_bytes[..32].copy_from_slice(&other_signing.to_bytes());
        signing_bytes[32..].copy_from_slice(other_verifying.as_bytes());
        let other = AuthContext::new(
            Key::from(&signing_bytes[..]),
            Key::from(&other_verifying.to_bytes()[..]),
            "sekrit".to_string(),
            chrono::Duration::hours(24),
        );
        assert_eq!(other.validate(&token), Err(ErrorCode::AuthInvalid));
    }
}
