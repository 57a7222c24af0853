// Verification of identity-provider access tokens.
//
// Studia does not implement sign-up, passwords, or email verification; an
// external identity provider mints HS256 tokens with a shared secret. This
// module verifies them and exposes the claims the core trusts, notably the
// `email_verified` flag gating session/chat participation.

use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityClaims {
    sub: String,
    username: String,
    email_verified: bool,
    iat: i64,
    exp: i64,
}

/// Claims extracted from a valid identity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: Uuid,
    pub username: String,
    pub email_verified: bool,
}

#[derive(Clone)]
pub struct IdentityTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl IdentityTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("identity token secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Mint a token the way the identity provider does. Used by local
    /// development tooling and the test suites; production tokens come from
    /// the provider itself.
    pub fn issue_identity_token(
        &self,
        user_id: Uuid,
        username: &str,
        email_verified: bool,
    ) -> anyhow::Result<String> {
        let issued_at = current_unix_timestamp()?;
        let claims = IdentityClaims {
            sub: user_id.to_string(),
            username: username.to_string(),
            email_verified,
            iat: issued_at,
            exp: issued_at + ACCESS_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode identity token")
    }

    pub fn verify_identity_token(&self, token: &str) -> anyhow::Result<VerifiedIdentity> {
        let claims = decode::<IdentityClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode identity token")?
            .claims;

        let user_id = Uuid::parse_str(&claims.sub)
            .with_context(|| format!("identity token subject '{}' is not a UUID", claims.sub))?;

        Ok(VerifiedIdentity {
            user_id,
            username: claims.username,
            email_verified: claims.email_verified,
        })
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}
