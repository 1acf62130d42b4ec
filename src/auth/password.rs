use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::common::error::AppError;

const ALGO: &str = "pbkdf2-sha256";
const ITERATIONS: u32 = 390_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// At least 8 characters with one letter and one digit. Anything past that
/// (breached-password lists, upper/lowercase mixes) is out of scope.
pub fn validate_policy(password: &str) -> Result<(), AppError> {
    if password.chars().count() < 8 {
        return Err(AppError::Validation("password must be at least 8 characters".into()));
    }
    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err(AppError::Validation(
            "password must contain at least one letter and one digit".into(),
        ));
    }
    Ok(())
}

/// Encodes as `pbkdf2-sha256$<iterations>$<salt-hex>$<digest-hex>`.
pub fn hash(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut digest = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, ITERATIONS, &mut digest);

    format!("{ALGO}${ITERATIONS}${}${}", hex::encode(salt), hex::encode(digest))
}

/// Verifies `password` against an encoded hash produced by [`hash`].
/// Constant-time over the digest comparison; malformed hashes are treated
/// as a non-match rather than an error, since the caller only cares
/// whether the credential is valid.
pub fn verify(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.splitn(4, '$');
    let (Some(algo), Some(iter_str), Some(salt_hex), Some(digest_hex)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if algo != ALGO {
        return false;
    }
    let Ok(iterations) = iter_str.parse::<u32>() else {
        return false;
    };
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    let Ok(expected) = hex::decode(digest_hex) else {
        return false;
    };

    let mut actual = vec![0u8; expected.len()];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut actual);

    actual.ct_eq(&expected).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let encoded = hash("correct-horse-9");
        assert!(verify("correct-horse-9", &encoded));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let encoded = hash("correct-horse-9");
        assert!(!verify("wrong-horse-9", &encoded));
    }

    #[test]
    fn verify_rejects_malformed_hash() {
        assert!(!verify("correct-horse-9", "not-an-encoded-hash"));
    }

    #[test]
    fn policy_rejects_short_passwords() {
        assert!(validate_policy("abc123").is_err());
    }

    #[test]
    fn policy_rejects_letters_only() {
        assert!(validate_policy("abcdefgh").is_err());
    }

    #[test]
    fn policy_rejects_digits_only() {
        assert!(validate_policy("12345678").is_err());
    }

    #[test]
    fn policy_accepts_letter_and_digit_mix() {
        assert!(validate_policy("abcd1234").is_ok());
    }
}
