//! Human-enterable room codes.

use rand::Rng;

/// Uppercase letters and digits without the easily confused `I`, `O` and `0`.
pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ123456789";

/// Draw a random code of `length` characters from [`JOIN_CODE_ALPHABET`].
pub fn generate<R>(length: usize, rng: &mut R) -> String
where
    R: Rng + ?Sized,
{
    (0..length)
        .map(|_| {
            let index = rng.random_range(0..JOIN_CODE_ALPHABET.len());
            char::from(JOIN_CODE_ALPHABET[index])
        })
        .collect()
}

/// Uppercase and trim user input before lookup.
pub fn normalize(input: &str) -> String {
    input.trim().to_ascii_uppercase()
}

/// Whether `code` only uses characters a generated code could contain.
pub fn is_well_formed(code: &str, length: usize) -> bool {
    code.len() == length && code.bytes().all(|b| JOIN_CODE_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn generated_codes_use_the_alphabet() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let code = generate(6, &mut rng);
            assert!(is_well_formed(&code, 6), "bad code {code}");
        }
    }

    #[test]
    fn normalize_uppercases_and_trims() {
        assert_eq!(normalize("  abc234 "), "ABC234");
        assert!(!is_well_formed("ABC230", 6));
        assert!(!is_well_formed("ABC23", 6));
    }
}
