use base64::Engine;
use rand::RngCore;

/// Raw entropy per secret. Stripping base64 padding and symbols keeps well
/// over 96 bits.
const SECRET_BYTES: usize = 24;

/// Generate a credential suitable for a cluster secret: random bytes,
/// base64-rendered, non-alphanumerics stripped. Never logged.
pub fn generate() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD
        .encode(bytes)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_are_long_enough() {
        for _ in 0..100 {
            let pw = generate();
            assert!(pw.len() >= 16, "password too short: {}", pw.len());
        }
    }

    #[test]
    fn passwords_are_alphanumeric() {
        let pw = generate();
        assert!(pw.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn passwords_are_distinct() {
        assert_ne!(generate(), generate());
    }
}
