//! Wire and domain types shared by the accrual engine's layers.
//!
//! Kept deliberately thin: this crate only describes the shapes that cross
//! a boundary (HTTP JSON, the `products`/`orders` tables). Business rules
//! (validation, accrual computation) live in `service`; persistence lives
//! in `repository`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Reward rule type, as stored in `products.reward_type`.
///
/// On the wire this is the string `"%"` or `"pt"`; internally it's
/// a plain enum so match arms in the accrual computation are exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardType {
    Percent,
    Points,
}

impl RewardType {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            RewardType::Percent => "%",
            RewardType::Points => "pt",
        }
    }

    pub fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "%" => Some(RewardType::Percent),
            "pt" => Some(RewardType::Points),
            _ => None,
        }
    }

    /// Representation stored in the `reward_type` column (small, stable,
    /// independent of the wire string so a future wire rename doesn't
    /// require a migration).
    pub fn as_db_code(self) -> i16 {
        match self {
            RewardType::Percent => 1,
            RewardType::Points => 2,
        }
    }

    pub fn from_db_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(RewardType::Percent),
            2 => Some(RewardType::Points),
            _ => None,
        }
    }
}

impl fmt::Display for RewardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

impl Serialize for RewardType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_wire_str())
    }
}

impl<'de> Deserialize<'de> for RewardType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        RewardType::from_wire_str(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown reward_type: '{raw}'")))
    }
}

/// A reward rule: goods whose description contains `match_text` earn this
/// reward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    #[serde(rename = "match")]
    pub match_text: String,
    pub reward: f64,
    pub reward_type: RewardType,
}

/// A single purchased good within an order submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Good {
    pub description: String,
    pub price: f64,
}

/// The raw submission body for `POST /api/orders`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderSubmission {
    pub order: String,
    pub goods: Vec<Good>,
}

/// Order status. `Invalid` is never persisted — it's the sentinel for
/// "no row exists".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            OrderStatus::Registered => "REGISTERED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    pub fn as_db_code(self) -> i16 {
        match self {
            OrderStatus::Registered => 0,
            OrderStatus::Processing => 1,
            OrderStatus::Processed => 2,
            OrderStatus::Invalid => unreachable!("INVALID is never persisted"),
        }
    }

    pub fn from_db_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(OrderStatus::Registered),
            1 => Some(OrderStatus::Processing),
            2 => Some(OrderStatus::Processed),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

impl Serialize for OrderStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_wire_str())
    }
}

/// Response body for `GET /api/orders/{number}`. `accrual` is
/// only present when `status == PROCESSED`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrderRewardResponse {
    pub order: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<f64>,
}

impl OrderRewardResponse {
    pub fn invalid(order: String) -> Self {
        Self {
            order,
            status: OrderStatus::Invalid,
            accrual: None,
        }
    }

    pub fn from_status(order: String, status: OrderStatus, accrual: f64) -> Self {
        let accrual = matches!(status, OrderStatus::Processed).then_some(accrual);
        Self {
            order,
            status,
            accrual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reward_type_round_trips_wire_strings() {
        assert_eq!(RewardType::from_wire_str("%"), Some(RewardType::Percent));
        assert_eq!(RewardType::from_wire_str("pt"), Some(RewardType::Points));
        assert_eq!(RewardType::from_wire_str("bogus"), None);
    }

    #[test]
    fn product_deserializes_percent_and_points() {
        let p: Product = serde_json::from_str(
            r#"{"match":"Bork","reward":10,"reward_type":"%"}"#,
        )
        .unwrap();
        assert_eq!(p.reward_type, RewardType::Percent);

        let p: Product = serde_json::from_str(
            r#"{"match":"iPhone","reward":500,"reward_type":"pt"}"#,
        )
        .unwrap();
        assert_eq!(p.reward_type, RewardType::Points);
    }

    #[test]
    fn product_rejects_unknown_reward_type() {
        let err = serde_json::from_str::<Product>(
            r#"{"match":"x","reward":1,"reward_type":"??"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown reward_type"));
    }

    #[test]
    fn order_reward_response_omits_accrual_unless_processed() {
        let registered = OrderRewardResponse::from_status("1".into(), OrderStatus::Registered, 0.0);
        let json = serde_json::to_string(&registered).unwrap();
        assert!(!json.contains("accrual"));

        let processed = OrderRewardResponse::from_status("1".into(), OrderStatus::Processed, 42.5);
        let json = serde_json::to_string(&processed).unwrap();
        assert!(json.contains("\"accrual\":42.5"));
    }

    #[test]
    fn invalid_response_has_no_accrual_field() {
        let resp = OrderRewardResponse::invalid("00000000000".into());
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"order":"00000000000","status":"INVALID"}"#);
    }
}
