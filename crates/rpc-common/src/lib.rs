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

//! Everything both sides of the socket agree on: the wrapped event envelope,
//! the closed sets of client frames, server events, GM command verbs and error
//! kinds, and the admin bearer token.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rusty_paseto::core::{
    Footer, Key, Paseto, PasetoAsymmetricPrivateKey, PasetoAsymmetricPublicKey, Payload, Public, V4,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

pub use client_messages::{ClientFrame, GmAction, HandshakeAuth, TransactionSubmit};
pub use envelope::{
    EnvironmentSnapshot, Envelope, Room, ServerEvent, StateSnapshot, SyncFullPayload, SystemStatus,
    VideoStatusPayload, VideoWireStatus,
};

pub mod client_messages;
pub mod envelope;

/// Footer baked into every admin bearer token, so tokens minted for other
/// deployments or purposes never validate here.
pub const ALN_AUTH_TOKEN_FOOTER: &str = "key-id:aln_admin";

/// A PASETO public token proving the bearer authenticated with the admin
/// password. Presented in the HTTP `Authorization` header and in the GM
/// socket handshake.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct AuthToken(pub String);

/// The closed set of error kinds surfaced to clients, on the wire and in HTTP
/// error bodies. Domain rejections (duplicates, unknown tokens, video
/// conflicts) are transaction outcomes, not members of this set.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthRequired,
    AuthInvalid,
    DeviceIdCollision,
    ValidationError,
    NoSession,
    SessionPaused,
    SessionExists,
    Duplicate,
    VideoBusy,
    QueueFull,
    RateLimit,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::AuthInvalid => "AUTH_INVALID",
            ErrorCode::DeviceIdCollision => "DEVICE_ID_COLLISION",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NoSession => "NO_SESSION",
            ErrorCode::SessionPaused => "SESSION_PAUSED",
            ErrorCode::SessionExists => "SESSION_EXISTS",
            ErrorCode::Duplicate => "DUPLICATE",
            ErrorCode::VideoBusy => "VIDEO_BUSY",
            ErrorCode::QueueFull => "QUEUE_FULL",
            ErrorCode::RateLimit => "RATE_LIMIT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The structured HTTP error body: `{error, message, details?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl ErrorBody {
    pub fn new(error: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Could not parse key material: {0}")]
    ParseError(pem::PemError),
    #[error("Could not read key from file: {0}")]
    ReadError(std::io::Error),
}

/// Load a keypair from the given public and private key (PEM) files. Returns
/// the 64-byte signing key (private || public) and the 32-byte verifying key.
pub fn load_keypair(public_key: &Path, private_key: &Path) -> Result<(Key<64>, Key<32>), KeyError> {
    let (Some(pubkey_pem), Some(privkey_pem)) = (
        std::fs::read(public_key).ok(),
        std::fs::read(private_key).ok(),
    ) else {
        return Err(KeyError::ReadError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not read key from file",
        )));
    };

    let privkey_pem = pem::parse(privkey_pem).map_err(KeyError::ParseError)?;
    let pubkey_pem = pem::parse(pubkey_pem).map_err(KeyError::ParseError)?;

    // PKCS8 DER wraps the raw 32-byte seed/point at the tail of the document.
    let priv_der = privkey_pem.contents();
    let pub_der = pubkey_pem.contents();
    if priv_der.len() < 32 || pub_der.len() < 32 {
        return Err(KeyError::ReadError(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Key material is too short",
        )));
    }
    let priv_raw = &priv_der[priv_der.len() - 32..];
    let pub_raw = &pub_der[pub_der.len() - 32..];

    let mut signing_bytes = [0u8; 64];
    signing_bytes[..32].copy_from_slice(priv_raw);
    signing_bytes[32..].copy_from_slice(pub_raw);

    Ok((Key::from(&signing_bytes[..]), Key::from(pub_raw)))
}

/// Mint an admin bearer token, valid for `ttl` from now.
pub fn mint_auth_token(private_key: &Key<64>, ttl: Duration) -> AuthToken {
    let privkey: PasetoAsymmetricPrivateKey<V4, Public> =
        PasetoAsymmetricPrivateKey::from(private_key.as_ref());
    let now = Utc::now();
    let token = Paseto::<V4, Public>::default()
        .set_footer(Footer::from(ALN_AUTH_TOKEN_FOOTER))
        .set_payload(Payload::from(
            json!({
                "sub": "admin",
                "iat": now.to_rfc3339(),
                "exp": (now + ttl).to_rfc3339(),
            })
            .to_string()
            .as_str(),
        ))
        .try_sign(&privkey)
        .expect("Unable to build Paseto token");
    AuthToken(token)
}

/// Verify an admin bearer token against the orchestrator's public key.
/// Signature, footer, subject and expiry must all check out.
pub fn validate_auth_token(public_key: &Key<32>, token: &AuthToken) -> Result<(), ErrorCode> {
    let pk: PasetoAsymmetricPublicKey<V4, Public> = PasetoAsymmetricPublicKey::from(public_key);
    let verified = Paseto::<V4, Public>::try_verify(
        token.0.as_str(),
        &pk,
        Footer::from(ALN_AUTH_TOKEN_FOOTER),
        None,
    )
    .map_err(|e| {
        warn!(error = ?e, "Unable to parse/validate token");
        ErrorCode::AuthInvalid
    })?;

    let claims = serde_json::from_str::<serde_json::Value>(verified.as_str()).map_err(|e| {
        warn!(error = ?e, "Token payload is not valid JSON");
        ErrorCode::AuthInvalid
    })?;

    if claims.get("sub").and_then(|s| s.as_str()) != Some("admin") {
        return Err(ErrorCode::AuthInvalid);
    }
    let Some(exp) = claims
        .get("exp")
        .and_then(|e| e.as_str())
        .and_then(|e| DateTime::parse_from_rfc3339(e).ok())
    else {
        return Err(ErrorCode::AuthInvalid);
    };
    if exp < Utc::now() {
        return Err(ErrorCode::AuthInvalid);
    }
    Ok(())
}
