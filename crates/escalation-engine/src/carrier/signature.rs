//! Carrier webhook signature verification
//!
//! The carrier signs each webhook with HMAC-SHA1 over the full request URL
//! concatenated with the form parameters sorted alphabetically by name,
//! base64-encoded into the signature header. A request that fails
//! verification is rejected with 403 and causes no state change.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Compute the expected signature for `url` and the given form parameters.
pub fn compute(auth_token: &str, url: &str, params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut payload = String::from(url);
    for (name, value) in sorted {
        payload.push_str(name);
        payload.push_str(value);
    }

    // Key length is unconstrained for HMAC, so this cannot fail in
    // practice; an empty signature simply never verifies.
    let Ok(mut mac) = HmacSha1::new_from_slice(auth_token.as_bytes()) else {
        return String::new();
    };
    mac.update(payload.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a provided signature header.
pub fn verify(auth_token: &str, url: &str, params: &[(String, String)], provided: &str) -> bool {
    let Ok(provided_raw) = BASE64.decode(provided.trim()) else {
        return false;
    };

    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let mut payload = String::from(url);
    for (name, value) in sorted {
        payload.push_str(name);
        payload.push_str(value);
    }

    let Ok(mut mac) = HmacSha1::new_from_slice(auth_token.as_bytes()) else {
        return false;
    };
    mac.update(payload.as_bytes());
    mac.verify_slice(&provided_raw).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Vec<(String, String)> {
        vec![
            ("To".into(), "+61400000001".into()),
            ("CallSid".into(), "CA123".into()),
            ("From".into(), "+61400000002".into()),
        ]
    }

    #[test]
    fn round_trip_verifies() {
        let sig = compute("token", "https://x.test/webhooks/voice", &params());
        assert!(verify("token", "https://x.test/webhooks/voice", &params(), &sig));
    }

    #[test]
    fn signature_covers_sorted_parameters() {
        let sig_a = compute("token", "https://x.test/webhooks/voice", &params());
        let mut shuffled = params();
        shuffled.reverse();
        let sig_b = compute("token", "https://x.test/webhooks/voice", &shuffled);
        // Parameter order in the request must not matter.
        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn tampering_fails_verification() {
        let sig = compute("token", "https://x.test/webhooks/voice", &params());
        let mut tampered = params();
        tampered[0].1 = "+61400009999".into();
        assert!(!verify("token", "https://x.test/webhooks/voice", &tampered, &sig));
        assert!(!verify("other-token", "https://x.test/webhooks/voice", &params(), &sig));
        assert!(!verify("token", "https://x.test/webhooks/voice", &params(), "not-base64!!"));
    }
}
