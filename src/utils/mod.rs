/// Kahan-compensated accumulation.
pub mod compensated;
/// Useful enumerations for various model components.
pub mod enums;
/// Coordinate systems, Lorentz boosts and helicity frames.
pub mod geometry;
/// Standard three- and four-vectors.
pub mod vectors;

/// Returns `true` if `two_j` describes an integer spin.
pub fn is_integer_spin(two_j: u32) -> bool {
    two_j % 2 == 0
}

/// The sign $`(-1)^n`$.
pub fn pow_neg_one(n: i32) -> f64 {
    if n.rem_euclid(2) == 0 {
        1.0
    } else {
        -1.0
    }
}

/// Format a doubled spin as `j` or `j/2`.
pub fn spin_to_string(two_j: i32) -> String {
    if two_j % 2 == 0 {
        format!("{}", two_j / 2)
    } else {
        format!("{}/2", two_j)
    }
}

/// All projections $`-j, -j+1, \ldots, j`$ of a doubled spin, doubled.
pub fn projections(two_j: u32) -> Vec<i32> {
    let two_j = two_j as i32;
    (-two_j..=two_j).step_by(2).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projections() {
        assert_eq!(projections(0), vec![0]);
        assert_eq!(projections(1), vec![-1, 1]);
        assert_eq!(projections(4), vec![-4, -2, 0, 2, 4]);
    }

    #[test]
    fn test_spin_strings() {
        assert_eq!(spin_to_string(4), "2");
        assert_eq!(spin_to_string(3), "3/2");
        assert_eq!(spin_to_string(-1), "-1/2");
    }

    #[test]
    fn test_signs() {
        assert_eq!(pow_neg_one(-3), -1.0);
        assert_eq!(pow_neg_one(4), 1.0);
    }
}
