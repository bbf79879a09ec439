//! PKCE (RFC 7636) helpers. Only the `S256` method is supported.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Code challenge method named in an authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkceMethod {
    S256,
}

impl PkceMethod {
    /// Parse the `code_challenge_method` parameter. `plain` and anything
    /// unknown are rejected.
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "S256" => Some(PkceMethod::S256),
            _ => None,
        }
    }
}

/// `BASE64URL-NOPAD(SHA256(verifier))`.
pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Check `verifier` against an S256 `challenge`.
pub fn verify_s256(verifier: &str, challenge: &str) -> bool {
    constant_time_eq(s256_challenge(verifier).as_bytes(), challenge.as_bytes())
}

/// Comparison whose running time does not depend on where inputs differ.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        let verifier = "dBjftJeZ4CVP-1B5oOMo1pR2KQGp5Ek6nQmCSIHjbTA";
        assert_eq!(
            s256_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_verify_accepts_matching_pair() {
        let verifier = "a-verifier-with-enough-entropy-0123456789abcdefghij";
        assert!(verify_s256(verifier, &s256_challenge(verifier)));
    }

    #[test]
    fn test_any_single_character_mutation_fails() {
        let verifier = "dBjftJeZ4CVP-1B5oOMo1pR2KQGp5Ek6nQmCSIHjbTA";
        let challenge = s256_challenge(verifier);

        for i in 0..verifier.len() {
            let mut bytes = verifier.as_bytes().to_vec();
            bytes[i] = if bytes[i] == b'x' { b'y' } else { b'x' };
            let mutated = String::from_utf8(bytes).unwrap();
            assert!(!verify_s256(&mutated, &challenge), "mutation at {} accepted", i);
        }
    }

    #[test]
    fn test_challenge_has_no_padding() {
        let challenge = s256_challenge("anything");
        assert_eq!(challenge.len(), 43);
        assert!(!challenge.contains('='));
        assert!(!challenge.contains('+') && !challenge.contains('/'));
    }

    #[test]
    fn test_only_s256_method_supported() {
        assert_eq!(PkceMethod::parse("S256"), Some(PkceMethod::S256));
        assert_eq!(PkceMethod::parse("plain"), None);
        assert_eq!(PkceMethod::parse("s256"), None);
    }
}
