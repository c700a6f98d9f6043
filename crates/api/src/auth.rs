//! Principal resolution and administrator credentials.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use subtle::ConstantTimeEq;

use crate::config::{AdminConfig, Secret};

/// Who is making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Authenticated { subject: String },
    Anonymous,
}

impl Principal {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::Authenticated { .. })
    }
}

/// Maps request headers to a [`Principal`]. Must not fail: anything it
/// cannot authenticate is anonymous.
pub trait PrincipalResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Principal;
}

/// Accepts `Authorization: Bearer <token>` for tokens configured at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenResolver {
    tokens: Vec<(Secret, String)>,
}

impl StaticTokenResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: Secret, subject: impl Into<String>) -> Self {
        self.tokens.push((token, subject.into()));
        self
    }
}

impl PrincipalResolver for StaticTokenResolver {
    fn resolve(&self, headers: &HeaderMap) -> Principal {
        let Some(presented) = bearer_token(headers) else {
            return Principal::Anonymous;
        };

        // Compare against every token so timing does not reveal which matched.
        let mut subject = None;
        for (token, owner) in &self.tokens {
            let matches: bool = token.expose().as_bytes().ct_eq(presented.as_bytes()).into();
            if matches && subject.is_none() {
                subject = Some(owner.clone());
            }
        }

        match subject {
            Some(subject) => Principal::Authenticated { subject },
            None => Principal::Anonymous,
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Administrator email, password hash and the token handed out on login.
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    email: String,
    password_hash: Secret,
    token: Secret,
}

impl AdminCredentials {
    /// `password_hash` is a PHC-format argon2 string.
    pub fn new(email: impl Into<String>, password_hash: Secret, token: Secret) -> Self {
        Self {
            email: email.into(),
            password_hash,
            token,
        }
    }

    /// Returns credentials when login is fully configured.
    pub fn from_config(config: &AdminConfig) -> Option<Self> {
        Some(Self::new(
            config.email.clone()?,
            config.password_hash.clone()?,
            config.api_token.clone()?,
        ))
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn token(&self) -> &Secret {
        &self.token
    }

    /// Checks a login attempt. CPU-bound; run it off the async workers.
    pub fn verify(&self, email: &str, password: &str) -> bool {
        let password_ok = match PasswordHash::new(self.password_hash.expose()) {
            Ok(hash) => Argon2::default()
                .verify_password(password.as_bytes(), &hash)
                .is_ok(),
            Err(e) => {
                tracing::error!(error = %e, "administrator password hash is unreadable");
                false
            }
        };
        let email_ok = self.email.eq_ignore_ascii_case(email.trim());
        password_ok & email_ok
    }
}

/// Hashes a password into the PHC string `ADMIN_PASSWORD_HASH` expects.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}
