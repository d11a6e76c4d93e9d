//! Time-based one-time passwords (RFC 6238, HMAC-SHA1, 6 digits, 30 s step).

use chrono::{DateTime, Utc};
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;

pub const DIGITS: u32 = 6;
pub const STEP_SECS: i64 = 30;
/// Accepted clock drift, in steps, on either side of the current one.
pub const SKEW_STEPS: i64 = 1;
const SECRET_BYTES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TotpError {
    #[error("secret is not valid base32")]
    BadSecret,
}

/// Fresh base32 secret suitable for authenticator apps.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

fn decode_secret(secret: &str) -> Result<Vec<u8>, TotpError> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|_| TotpError::BadSecret)
}

fn hotp(key: &[u8], counter: u64) -> u32 {
    // HMAC accepts keys of any length.
    let mut mac = match Hmac::<Sha1>::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return 0,
    };
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    binary % 10u32.pow(DIGITS)
}

/// Step counter for `unix_secs`.
pub fn step_at(unix_secs: i64) -> i64 {
    unix_secs.div_euclid(STEP_SECS).max(0)
}

fn code_for_step(key: &[u8], step: i64) -> String {
    format!("{:0width$}", hotp(key, step as u64), width = DIGITS as usize)
}

/// Code for the step containing `unix_secs`, zero-padded.
pub fn code_at(secret: &str, unix_secs: i64) -> Result<String, TotpError> {
    let key = decode_secret(secret)?;
    Ok(code_for_step(&key, step_at(unix_secs)))
}

/// Matches the code against the current step and one step either side.
///
/// Returns the latest matching step so callers can refuse a second use of it.
pub fn verify(secret: &str, code: &str, now: DateTime<Utc>) -> Result<Option<i64>, TotpError> {
    let key = decode_secret(secret)?;
    let code = code.trim();
    if code.len() != DIGITS as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    let current = step_at(now.timestamp());
    Ok((current - SKEW_STEPS..=current + SKEW_STEPS)
        .rev()
        .filter(|step| *step >= 0)
        .find(|step| code_for_step(&key, *step) == code))
}

/// Characters escaped in `otpauth://` labels: everything but RFC 3986 unreserved.
const LABEL: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// `otpauth://` URI for QR enrollment.
pub fn provisioning_uri(secret: &str, account: &str, issuer: &str) -> String {
    format!(
        "otpauth://totp/{issuer_enc}:{account_enc}?secret={secret}&issuer={issuer_enc}&algorithm=SHA1&digits={DIGITS}&period={STEP_SECS}",
        issuer_enc = utf8_percent_encode(issuer, LABEL),
        account_enc = utf8_percent_encode(account, LABEL),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // "12345678901234567890" in base32.
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn rfc6238_sha1_vectors() {
        assert_eq!(code_at(RFC_SECRET, 59).unwrap(), "287082");
        assert_eq!(code_at(RFC_SECRET, 1_111_111_109).unwrap(), "081804");
        assert_eq!(code_at(RFC_SECRET, 1_234_567_890).unwrap(), "005924");
    }

    #[test]
    fn verify_tolerates_one_step_of_drift() {
        let now = Utc.timestamp_opt(1_234_567_890, 0).unwrap();
        let current = step_at(1_234_567_890);
        let previous = code_at(RFC_SECRET, 1_234_567_890 - STEP_SECS).unwrap();
        let far = code_at(RFC_SECRET, 1_234_567_890 - 3 * STEP_SECS).unwrap();

        assert_eq!(verify(RFC_SECRET, "005924", now).unwrap(), Some(current));
        assert_eq!(verify(RFC_SECRET, &previous, now).unwrap(), Some(current - 1));
        assert_eq!(verify(RFC_SECRET, &far, now).unwrap(), None);
        assert_eq!(verify(RFC_SECRET, "12ab56", now).unwrap(), None);
    }

    #[test]
    fn malformed_code_still_reports_bad_secret() {
        let now = Utc.timestamp_opt(59, 0).unwrap();
        assert_eq!(verify("not base32!", "12", now), Err(TotpError::BadSecret));
    }

    #[test]
    fn generated_secret_decodes_to_twenty_bytes() {
        let secret = generate_secret();
        assert_eq!(decode_secret(&secret).unwrap().len(), 20);
        assert_ne!(secret, generate_secret());
    }

    #[test]
    fn bad_secret_is_an_error() {
        assert_eq!(code_at("not base32!", 0), Err(TotpError::BadSecret));
    }

    #[test]
    fn provisioning_uri_escapes_labels() {
        let uri = provisioning_uri("ABC", "ops@example.com", "E-Waste Market");
        assert!(uri.starts_with("otpauth://totp/E-Waste%20Market:ops%40example.com?secret=ABC"));
        assert!(uri.contains("&issuer=E-Waste%20Market&"));
        assert!(uri.contains("&digits=6&period=30"));
    }
}
