use hmac::{Hmac, Mac};
use sha2::Sha512;
use tracing::debug;

type HmacSha512 = Hmac<Sha512>;

/// Hex-encoded HMAC-SHA512 of the raw webhook body.
pub fn compute_webhook_signature(secret: &str, raw_body: &[u8]) -> String {
    match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(raw_body);
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

/// Constant-time check of a hex signature header against the raw body.
pub fn verify_webhook_signature(secret: &str, raw_body: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        debug!("Webhook secret not configured, rejecting signature");
        return false;
    }

    let Ok(expected) = hex::decode(signature.trim()) else {
        debug!("Webhook signature is not valid hex");
        return false;
    };

    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computed_signature_verifies() {
        let body = br#"{"event":"charge.success","data":{"reference":"DC-1"}}"#;
        let signature = compute_webhook_signature("sk_test", body);
        assert_eq!(signature.len(), 128);
        assert!(verify_webhook_signature("sk_test", body, &signature));
    }

    #[test]
    fn tampered_body_or_secret_fails() {
        let body = br#"{"event":"charge.success"}"#;
        let signature = compute_webhook_signature("sk_test", body);
        assert!(!verify_webhook_signature("sk_test", br#"{"event":"charge.failed"}"#, &signature));
        assert!(!verify_webhook_signature("other", body, &signature));
        assert!(!verify_webhook_signature("", body, &signature));
        assert!(!verify_webhook_signature("sk_test", body, "not-hex"));
    }
}
