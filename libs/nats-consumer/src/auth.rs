//! Authentication material and credential selection.
//!
//! Selection walks a fixed, ordered strategy table and stops at the first
//! strategy whose material is present:
//!
//! 1. credentials file
//! 2. inline JWT + inline seed (synthesized into a credentials blob)
//! 3. inline JWT only
//! 4. inline seed only
//! 5. anonymous, if the anonymous policy allows it

use std::fmt;

use tracing::{info, warn};

use crate::config::AnonymousPolicy;
use crate::error::AuthError;

const JWT_BEGIN: &str = "-----BEGIN NATS USER JWT-----";
const JWT_END: &str = "------END NATS USER JWT------";
const SEED_BEGIN: &str = "-----BEGIN USER NKEY SEED-----";
const SEED_END: &str = "------END USER NKEY SEED-----";

/// Raw authentication material gathered by the configuration loader.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthMaterial {
    /// trimmed contents of the credentials file
    pub creds: Option<String>,
    pub jwt: Option<String>,
    pub seed: Option<String>,
}

impl AuthMaterial {
    pub fn is_empty(&self) -> bool {
        self.creds.is_none() && self.jwt.is_none() && self.seed.is_none()
    }
}

impl fmt::Debug for AuthMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthMaterial")
            .field("creds", &self.creds.as_ref().map(|_| "***"))
            .field("jwt", &self.jwt.as_ref().map(|_| "***"))
            .field("seed", &self.seed.as_ref().map(|_| "***"))
            .finish()
    }
}

/// The one credential a connection is opened with.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthCredential {
    /// Contents of a credentials file, handed to the client untouched.
    CredentialsBlob(String),
    /// Inline JWT + seed, already synthesized into the credentials file format.
    JwtAndSeed(String),
    /// Bearer JWT without a signing seed.
    JwtOnly(String),
    /// Nkey seed without a JWT.
    KeyOnly(String),
    Anonymous,
}

impl AuthCredential {
    /// Static label for logs; never contains secret material.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthCredential::CredentialsBlob(_) => "credentials_file",
            AuthCredential::JwtAndSeed(_) => "jwt_and_seed",
            AuthCredential::JwtOnly(_) => "jwt_only",
            AuthCredential::KeyOnly(_) => "key_only",
            AuthCredential::Anonymous => "anonymous",
        }
    }
}

impl fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthCredential({})", self.kind())
    }
}

/// Build a credentials blob in the same layout as a `.creds` file.
pub fn synthesize_creds(jwt: &str, seed: &str) -> String {
    format!("{JWT_BEGIN}\n{jwt}\n{JWT_END}\n\n{SEED_BEGIN}\n{seed}\n{SEED_END}")
}

/// One entry in the selection table.
struct Strategy {
    name: &'static str,
    applies: fn(&AuthMaterial) -> bool,
    build: fn(&AuthMaterial) -> AuthCredential,
}

/// Evaluated in order; first applicable entry wins.
const STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "credentials_file",
        applies: |m| m.creds.is_some(),
        build: |m| AuthCredential::CredentialsBlob(m.creds.clone().unwrap_or_default()),
    },
    Strategy {
        name: "jwt_and_seed",
        applies: |m| m.jwt.is_some() && m.seed.is_some(),
        build: |m| {
            AuthCredential::JwtAndSeed(synthesize_creds(
                m.jwt.as_deref().unwrap_or_default(),
                m.seed.as_deref().unwrap_or_default(),
            ))
        },
    },
    Strategy {
        name: "jwt_only",
        applies: |m| m.jwt.is_some(),
        build: |m| AuthCredential::JwtOnly(m.jwt.clone().unwrap_or_default()),
    },
    Strategy {
        name: "key_only",
        applies: |m| m.seed.is_some(),
        build: |m| AuthCredential::KeyOnly(m.seed.clone().unwrap_or_default()),
    },
];

/// Pick exactly one credential for the given material.
pub fn select(
    material: &AuthMaterial,
    anonymous: AnonymousPolicy,
) -> Result<AuthCredential, AuthError> {
    if let Some(strategy) = STRATEGIES.iter().find(|s| (s.applies)(material)) {
        info!(strategy = strategy.name, "selected authentication strategy");
        return Ok((strategy.build)(material));
    }
    match anonymous {
        AnonymousPolicy::Allow => {
            warn!("no authentication material configured, connecting anonymously");
            Ok(AuthCredential::Anonymous)
        }
        AnonymousPolicy::Deny => Err(AuthError::NotConfigured),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn material(creds: Option<&str>, jwt: Option<&str>, seed: Option<&str>) -> AuthMaterial {
        AuthMaterial {
            creds: creds.map(Into::into),
            jwt: jwt.map(Into::into),
            seed: seed.map(Into::into),
        }
    }

    #[test]
    fn test_synthesize_creds_exact_format() {
        assert_eq!(
            synthesize_creds("J", "K"),
            "-----BEGIN NATS USER JWT-----\nJ\n------END NATS USER JWT------\n\n-----BEGIN USER NKEY SEED-----\nK\n------END USER NKEY SEED-----"
        );
    }

    #[test]
    fn test_select_priority_order() {
        let all = material(Some("blob"), Some("J"), Some("K"));
        assert_eq!(
            select(&all, AnonymousPolicy::Deny).unwrap(),
            AuthCredential::CredentialsBlob("blob".into())
        );

        let inline = material(None, Some("J"), Some("K"));
        assert_eq!(
            select(&inline, AnonymousPolicy::Deny).unwrap(),
            AuthCredential::JwtAndSeed(synthesize_creds("J", "K"))
        );

        let jwt = material(None, Some("J"), None);
        assert_eq!(
            select(&jwt, AnonymousPolicy::Deny).unwrap(),
            AuthCredential::JwtOnly("J".into())
        );

        let key = material(None, None, Some("K"));
        assert_eq!(
            select(&key, AnonymousPolicy::Deny).unwrap(),
            AuthCredential::KeyOnly("K".into())
        );
    }

    #[test]
    #[traced_test]
    fn test_select_anonymous_allowed_warns() {
        let cred = select(&AuthMaterial::default(), AnonymousPolicy::Allow).unwrap();
        assert_eq!(cred, AuthCredential::Anonymous);
        assert!(logs_contain("connecting anonymously"));
    }

    #[test]
    fn test_select_anonymous_denied() {
        let err = select(&AuthMaterial::default(), AnonymousPolicy::Deny).unwrap_err();
        assert!(matches!(err, AuthError::NotConfigured));
    }

    #[test]
    fn test_debug_redacts() {
        let cred = AuthCredential::JwtAndSeed(synthesize_creds("SECRETJWT", "SUSEED"));
        assert_eq!(format!("{cred:?}"), "AuthCredential(jwt_and_seed)");
        let m = material(Some("blob"), Some("SECRETJWT"), None);
        assert!(!format!("{m:?}").contains("SECRETJWT"));
    }
}
