//! Webhook signature verification (HMAC-SHA256 over the raw body).
//!
//! The provider signs every delivery with the shared webhook secret and sends
//! the digest in `X-Hub-Signature-256` as `sha256=<hex>`. Verification happens
//! before the body is parsed; a request that fails it never reaches the pipeline.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header prefix naming the digest algorithm.
const SIGNATURE_PREFIX: &str = "sha256=";

/// Why a delivery's signature was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// The header is not `sha256=<hex>`.
    #[error("malformed signature header")]
    MalformedHeader,

    /// The digest does not match the body.
    #[error("signature does not match payload")]
    Mismatch,
}

/// Decodes the digest from a `sha256=<hex>` header value.
///
/// ```
/// use grader_hooks::webhooks::parse_signature_header;
///
/// assert_eq!(parse_signature_header("sha256=00ff"), Some(vec![0x00, 0xff]));
/// assert!(parse_signature_header("sha1=00ff").is_none());
/// assert!(parse_signature_header("sha256=zz").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    hex::decode(header.strip_prefix(SIGNATURE_PREFIX)?).ok()
}

/// Computes the raw HMAC-SHA256 digest of `payload`.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Returns the header value the provider would send for `payload`.
pub fn sign_payload(payload: &[u8], secret: &[u8]) -> String {
    format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(compute_signature(payload, secret))
    )
}

/// Checks `signature_header` against `payload` using a constant-time comparison.
///
/// ```
/// use grader_hooks::webhooks::{sign_payload, verify_signature};
///
/// let header = sign_payload(b"{}", b"secret");
/// assert!(verify_signature(b"{}", &header, b"secret").is_ok());
/// assert!(verify_signature(b"{}", &header, b"other").is_err());
/// ```
pub fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &[u8],
) -> Result<(), SignatureError> {
    let expected = parse_signature_header(signature_header).ok_or(SignatureError::MalformedHeader)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::Mismatch)?;
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_lower_and_upper_case_hex() {
        assert_eq!(
            parse_signature_header("sha256=1234abcd"),
            Some(vec![0x12, 0x34, 0xab, 0xcd])
        );
        assert_eq!(
            parse_signature_header("sha256=ABCD"),
            Some(vec![0xab, 0xcd])
        );
    }

    #[test]
    fn rejects_odd_length_and_missing_prefix() {
        assert_eq!(parse_signature_header("sha256=abc"), None);
        assert_eq!(parse_signature_header("1234abcd"), None);
        assert_eq!(parse_signature_header(""), None);
    }

    #[test]
    fn digest_is_32_bytes() {
        assert_eq!(compute_signature(b"payload", b"secret").len(), 32);
    }

    #[test]
    fn malformed_header_is_distinguished_from_mismatch() {
        assert_eq!(
            verify_signature(b"x", "not-a-header", b"s"),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            verify_signature(b"x", "sha256=00", b"s"),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn tampered_body_is_rejected() {
        let header = sign_payload(br#"{"ref":"refs/heads/main"}"#, b"secret");
        assert_eq!(
            verify_signature(br#"{"ref":"refs/heads/evil"}"#, &header, b"secret"),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn empty_secret_and_payload_verify() {
        let header = sign_payload(b"", b"");
        assert!(verify_signature(b"", &header, b"").is_ok());
    }

    proptest! {
        #[test]
        fn signed_payload_verifies(payload: Vec<u8>, secret: Vec<u8>) {
            let header = sign_payload(&payload, &secret);
            prop_assert!(verify_signature(&payload, &header, &secret).is_ok());
        }

        #[test]
        fn other_secret_fails(payload: Vec<u8>, secret: Vec<u8>, other: Vec<u8>) {
            prop_assume!(secret != other);
            let header = sign_payload(&payload, &secret);
            prop_assert_eq!(
                verify_signature(&payload, &header, &other),
                Err(SignatureError::Mismatch)
            );
        }

        #[test]
        fn arbitrary_headers_never_panic(header: String, payload: Vec<u8>) {
            let _ = verify_signature(&payload, &header, b"secret");
        }
    }
}
