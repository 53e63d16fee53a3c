//! Menu Catalog Models
//!
//! Cloud-authoritative: the terminal only ever receives these through the
//! reconciliation pull, never mutates them locally.

use serde::{Deserialize, Serialize};

/// Menu item entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    pub category: String,
    /// Price in currency unit
    pub price: f64,
    pub is_active: bool,
    /// Routing hint for the kitchen display (e.g. "bar", "hot_kitchen")
    pub kds_routing: Option<String>,
    pub sort_order: i32,
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Modifier option group (milk type, size, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionGroup {
    pub id: String,
    pub name: String,
    /// Menu item this group applies to
    pub menu_item_id: String,
    pub is_required: bool,
    pub options: Vec<OptionValue>,
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A single selectable option within a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionValue {
    pub id: String,
    pub name: String,
    /// Price adjustment in currency unit (may be negative)
    pub price_adjustment: f64,
}
