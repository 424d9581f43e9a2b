//! PKCE (RFC 7636) and CSRF state generation

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use super::error::AuthError;

/// Random bytes behind each verifier/state (43 base64url characters).
const RANDOM_BYTES: usize = 32;

/// Per-login parameters: CSRF `state` plus the PKCE verifier/challenge pair.
#[derive(Debug, Clone)]
pub struct PkceParams {
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
}

impl PkceParams {
    pub fn generate() -> Result<Self, AuthError> {
        let state = random_token()?;
        let code_verifier = random_token()?;
        let code_challenge = code_challenge_s256(&code_verifier);
        Ok(Self {
            state,
            code_verifier,
            code_challenge,
        })
    }

    pub fn challenge_method(&self) -> &'static str {
        "S256"
    }
}

fn random_token() -> Result<String, AuthError> {
    let mut bytes = [0u8; RANDOM_BYTES];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| AuthError::Config(format!("system RNG unavailable: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// `BASE64URL(SHA256(verifier))` without padding.
pub fn code_challenge_s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc7636_vector() {
        // Appendix B of RFC 7636
        assert_eq!(
            code_challenge_s256("dBjftJeZ4CVP-mB92K27uhbUJU1p1r-wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_generated_params_are_url_safe() {
        let params = PkceParams::generate().unwrap();

        assert_eq!(params.code_verifier.len(), 43);
        assert_eq!(params.state.len(), 43);
        for value in [&params.state, &params.code_verifier, &params.code_challenge] {
            assert!(value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
        assert_eq!(
            params.code_challenge,
            code_challenge_s256(&params.code_verifier)
        );
        assert_eq!(params.challenge_method(), "S256");
    }

    #[test]
    fn test_params_are_unique() {
        let a = PkceParams::generate().unwrap();
        let b = PkceParams::generate().unwrap();
        assert_ne!(a.state, b.state);
        assert_ne!(a.code_verifier, b.code_verifier);
        assert_ne!(a.state, a.code_verifier);
    }
}
