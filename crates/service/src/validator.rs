//! Syntactic validation of submitted orders and products.

use model::{OrderSubmission, Product};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("incorrect format: {0}")]
pub struct ValidationError(pub String);

/// Rejects an empty `id`, an `id` with non-digit characters, or an `id`
/// failing the Luhn mod-10 checksum.
pub fn validate_order(submission: &OrderSubmission) -> Result<(), ValidationError> {
    if submission.order.is_empty() {
        return Err(ValidationError("order id is empty".into()));
    }
    if !submission.order.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError("order id must be decimal digits".into()));
    }
    if !luhn_is_valid(&submission.order) {
        return Err(ValidationError("order id fails Luhn checksum".into()));
    }
    Ok(())
}

/// Rejects an empty `match`, a negative `reward`, or a `reward_type`
/// outside `{PERCENT, POINTS}`. Wire decoding of `reward_type`
/// already rejects unknown strings at JSON-parse time (`model::RewardType`'s
/// `Deserialize` impl), so this only re-checks what's representable in the
/// parsed struct.
pub fn validate_product(product: &Product) -> Result<(), ValidationError> {
    if product.match_text.is_empty() {
        return Err(ValidationError("match is empty".into()));
    }
    if product.reward < 0.0 {
        return Err(ValidationError("reward must be non-negative".into()));
    }
    Ok(())
}

/// Classical Luhn mod-10 checksum: doubling every second digit from the
/// rightmost, summing digits of doubled results, total ≡ 0 (mod 10).
fn luhn_is_valid(digits: &str) -> bool {
    let sum: u32 = digits
        .chars()
        .rev()
        .enumerate()
        .map(|(i, c)| {
            let d = c.to_digit(10).expect("caller already checked all-digit");
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::Good;

    fn submission(order: &str) -> OrderSubmission {
        OrderSubmission {
            order: order.to_string(),
            goods: vec![Good {
                description: "widget".into(),
                price: 1.0,
            }],
        }
    }

    #[test]
    fn accepts_known_luhn_valid_id() {
        assert!(validate_order(&submission("79927398713")).is_ok());
    }

    #[test]
    fn rejects_known_luhn_invalid_id() {
        assert!(validate_order(&submission("79927398710")).is_err());
    }

    #[test]
    fn rejects_empty_id() {
        assert!(validate_order(&submission("")).is_err());
    }

    #[test]
    fn rejects_non_digit_id() {
        assert!(validate_order(&submission("799273987a3")).is_err());
    }

    #[test]
    fn accepts_another_luhn_valid_id() {
        assert!(validate_order(&submission("12345678903")).is_ok());
    }

    #[test]
    fn validate_product_rejects_empty_match() {
        let p = Product {
            match_text: "".into(),
            reward: 1.0,
            reward_type: model::RewardType::Percent,
        };
        assert!(validate_product(&p).is_err());
    }

    #[test]
    fn validate_product_rejects_negative_reward() {
        let p = Product {
            match_text: "x".into(),
            reward: -1.0,
            reward_type: model::RewardType::Points,
        };
        assert!(validate_product(&p).is_err());
    }

    #[test]
    fn validate_product_accepts_well_formed_product() {
        let p = Product {
            match_text: "Bork".into(),
            reward: 10.0,
            reward_type: model::RewardType::Percent,
        };
        assert!(validate_product(&p).is_ok());
    }
}
