//! Order Model

use serde::{Deserialize, Serialize};

/// Order status (kitchen workflow)
///
/// Transitions are monotonic: `Open → InProgress → Ready → Closed`.
/// A mutation that would move an order backward relative to the cloud's
/// state is rejected rather than silently overwritten.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Open,
    InProgress,
    Ready,
    Closed,
}

impl OrderStatus {
    /// Position in the kitchen workflow (higher = further along)
    pub fn rank(&self) -> u8 {
        match self {
            Self::Open => 0,
            Self::InProgress => 1,
            Self::Ready => 2,
            Self::Closed => 3,
        }
    }

    /// Parse from database string value (lowercase)
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "ready" => Some(Self::Ready),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    /// Database string representation (lowercase)
    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Ready => "ready",
            Self::Closed => "closed",
        }
    }
}

/// Order item status — follows the parent order's workflow
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    #[default]
    Queued,
    InProgress,
    Ready,
    Completed,
}

impl ItemStatus {
    /// Position in the item workflow (higher = further along)
    pub fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::InProgress => 1,
            Self::Ready => 2,
            Self::Completed => 3,
        }
    }
}

/// Order entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_number: i64,
    pub status: OrderStatus,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub is_paid: bool,
    /// Total amount in currency unit
    pub total_amount: f64,
    pub note: Option<String>,
    /// Monotonic entity version, bumped on every write
    pub version: u64,
    /// Unix millis
    pub created_at: i64,
    pub updated_at: i64,
}

/// Order item entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    /// Parent order reference
    pub order_id: String,
    /// Menu item reference
    pub menu_item_id: String,
    pub name: String,
    pub status: ItemStatus,
    pub quantity: i32,
    /// Unit price in currency unit
    pub price: f64,
    /// Selected modifiers, e.g. "oat milk, extra shot"
    pub modifiers: Option<String>,
    pub note: Option<String>,
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_rank_is_monotonic() {
        assert!(OrderStatus::Open.rank() < OrderStatus::InProgress.rank());
        assert!(OrderStatus::InProgress.rank() < OrderStatus::Ready.rank());
        assert!(OrderStatus::Ready.rank() < OrderStatus::Closed.rank());
    }

    #[test]
    fn test_status_db_round_trip() {
        for status in [
            OrderStatus::Open,
            OrderStatus::InProgress,
            OrderStatus::Ready,
            OrderStatus::Closed,
        ] {
            assert_eq!(OrderStatus::from_db(status.as_db()), Some(status));
        }
        assert_eq!(OrderStatus::from_db("voided"), None);
    }
}
