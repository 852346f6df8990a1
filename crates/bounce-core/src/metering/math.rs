//! Level conversions.

/// Linear amplitude to decibels. Zero maps to negative infinity.
#[inline]
pub fn amplitude_to_db(amplitude: f64) -> f64 {
    if amplitude <= 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * amplitude.log10()
    }
}

/// Decibels to linear amplitude. Negative infinity maps to zero.
#[inline]
pub fn db_to_amplitude(db: f64) -> f64 {
    if db == f64::NEG_INFINITY {
        0.0
    } else {
        10.0f64.powf(db / 20.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_db_conversion() {
        assert_relative_eq!(db_to_amplitude(0.0), 1.0);
        assert_relative_eq!(db_to_amplitude(-6.0206), 0.5, epsilon = 1e-4);
        assert_relative_eq!(amplitude_to_db(0.5), -6.0206, epsilon = 1e-4);
        assert_eq!(amplitude_to_db(0.0), f64::NEG_INFINITY);
        assert_eq!(db_to_amplitude(f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn test_minus_ninety_db_threshold() {
        assert_relative_eq!(db_to_amplitude(-90.0), 3.1623e-5, epsilon = 1e-8);
    }
}
