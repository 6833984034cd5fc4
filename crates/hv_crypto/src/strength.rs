//! Secret strength heuristics.
//!
//! Format and pattern checks only — no entropy estimation. PINs are
//! digits-only with sequential/repeated-pattern rejection; passwords
//! need length plus mixed character classes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    Weak,
    Fair,
    Strong,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrengthReport {
    pub strength: Strength,
    pub message: String,
}

impl StrengthReport {
    fn weak(message: &str) -> Self {
        Self { strength: Strength::Weak, message: message.to_string() }
    }
}

/// PIN rules: digits only, length 4–12, not purely sequential
/// (ascending or descending), not a single repeated digit.
pub fn assess_pin_strength(pin: &str) -> StrengthReport {
    if pin.is_empty() || !pin.chars().all(|c| c.is_ascii_digit()) {
        return StrengthReport::weak("PIN must contain only digits");
    }
    if pin.len() < 4 {
        return StrengthReport::weak("PIN must be at least 4 digits");
    }
    if pin.len() > 12 {
        return StrengthReport::weak("PIN must be at most 12 digits");
    }
    let digits: Vec<i16> = pin.bytes().map(|b| (b - b'0') as i16).collect();
    if digits.windows(2).all(|w| w[1] == w[0]) {
        return StrengthReport::weak("PIN must not repeat a single digit");
    }
    if digits.windows(2).all(|w| w[1] - w[0] == 1) || digits.windows(2).all(|w| w[0] - w[1] == 1) {
        return StrengthReport::weak("PIN must not be a sequential run");
    }
    if pin.len() >= 6 {
        StrengthReport { strength: Strength::Strong, message: "Strong PIN".to_string() }
    } else {
        StrengthReport {
            strength: Strength::Fair,
            message: "Acceptable — longer PINs are stronger".to_string(),
        }
    }
}

/// Password rules: length ≥ 8 with upper case, lower case, and a digit.
pub fn assess_password_strength(password: &str) -> StrengthReport {
    if password.len() < 8 {
        return StrengthReport::weak("Password must be at least 8 characters");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return StrengthReport::weak("Password needs an upper-case letter");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return StrengthReport::weak("Password needs a lower-case letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return StrengthReport::weak("Password needs a digit");
    }
    let has_symbol = password.chars().any(|c| !c.is_ascii_alphanumeric());
    if password.len() >= 12 && has_symbol {
        StrengthReport { strength: Strength::Strong, message: "Strong password".to_string() }
    } else {
        StrengthReport {
            strength: Strength::Fair,
            message: "Acceptable — add length or symbols for a stronger password".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_format_rules() {
        assert_eq!(assess_pin_strength("12a4").strength, Strength::Weak);
        assert_eq!(assess_pin_strength("123").strength, Strength::Weak);
        assert_eq!(assess_pin_strength("1234567890123").strength, Strength::Weak);
    }

    #[test]
    fn pin_pattern_rules() {
        assert_eq!(assess_pin_strength("1111").strength, Strength::Weak);
        assert_eq!(assess_pin_strength("1234").strength, Strength::Weak);
        assert_eq!(assess_pin_strength("9876").strength, Strength::Weak);
        assert_eq!(assess_pin_strength("4821").strength, Strength::Fair);
        assert_eq!(assess_pin_strength("482173").strength, Strength::Strong);
    }

    #[test]
    fn password_class_rules() {
        assert_eq!(assess_password_strength("short1A").strength, Strength::Weak);
        assert_eq!(assess_password_strength("alllower1").strength, Strength::Weak);
        assert_eq!(assess_password_strength("ALLUPPER1").strength, Strength::Weak);
        assert_eq!(assess_password_strength("NoDigitsHere").strength, Strength::Weak);
        assert_eq!(assess_password_strength("Passw0rdd").strength, Strength::Fair);
        assert_eq!(assess_password_strength("Longer&Passw0rd").strength, Strength::Strong);
    }
}
