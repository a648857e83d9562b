/// Folds a slice of sensor bits (MSB first) into a byte.
/// Anything that is not a 0 or 1 is treated as line noise and skipped.
pub fn bits_to_byte(bits: &[u8]) -> u8 {
    bits.iter()
        .filter(|&&bit| bit <= 1)
        .fold(0, |acc, &bit| (acc << 1) | bit)
}

/// Rounds to one fractional digit, ties away from zero.
pub fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_bits_into_byte() {
        assert_eq!(bits_to_byte(&[1, 1, 0, 1]), 13);
        assert_eq!(bits_to_byte(&[1, 1, 1, 1, 1, 1, 1, 1]), 255);
    }

    #[test]
    fn skips_noise() {
        assert_eq!(bits_to_byte(&[10, 10, 0]), 0);
        assert_eq!(bits_to_byte(&[1, 7, 0]), 2);
    }

    #[test]
    fn rounds_ties_away_from_zero() {
        assert_eq!(round_tenths(22.45), 22.5);
        assert_eq!(round_tenths(44.95), 45.0);
        assert_eq!(round_tenths(-3.25), -3.3);
        assert_eq!(round_tenths(20.0), 20.0);
    }
}
