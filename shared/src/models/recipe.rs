//! Menu items and recipes

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use super::inventory::Unit;

/// Kitchen station classification used to route tickets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrepArea {
    Grill,
    Cold,
    Fry,
    Kitchen,
    Bar,
}

impl PrepArea {
    pub const ALL: [PrepArea; 5] = [
        PrepArea::Grill,
        PrepArea::Cold,
        PrepArea::Fry,
        PrepArea::Kitchen,
        PrepArea::Bar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PrepArea::Grill => "GRILL",
            PrepArea::Cold => "COLD",
            PrepArea::Fry => "FRY",
            PrepArea::Kitchen => "KITCHEN",
            PrepArea::Bar => "BAR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for PrepArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sellable menu entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: String,
    pub venue_id: String,
    pub name: String,
    /// Price in minor units
    pub price: i64,
    /// Tax rate in basis points (1800 = 18%)
    pub tax_rate_bps: u32,
    pub prep_area: PrepArea,
    pub recipe_id: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MenuItemCreate {
    #[validate(length(min = 1, max = 64))]
    pub venue_id: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(range(min = 0, max = 100_000_000))]
    pub price: i64,
    #[serde(default)]
    #[validate(range(max = 10000))]
    pub tax_rate_bps: u32,
    pub prep_area: PrepArea,
    pub recipe_id: Option<String>,
}

/// One line of a recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipeComponent {
    /// Raw stock item
    Ingredient {
        item_id: String,
        /// Net quantity per recipe yield
        qty: Decimal,
        unit: Unit,
        /// Trim/prep loss, inflates the drawn quantity
        #[serde(default)]
        waste_pct: Option<Decimal>,
    },
    /// Nested recipe, `qty` in portions of its yield
    SubRecipe {
        recipe_id: String,
        qty: Decimal,
        #[serde(default)]
        waste_pct: Option<Decimal>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub venue_id: String,
    pub name: String,
    /// Portions produced by one batch of `components`
    pub yield_qty: Decimal,
    pub components: Vec<RecipeComponent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecipeCreate {
    /// Client-chosen id; generated when absent
    pub id: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub venue_id: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[serde(default = "default_yield")]
    pub yield_qty: Decimal,
    #[validate(length(min = 1))]
    pub components: Vec<RecipeComponent>,
}

fn default_yield() -> Decimal {
    Decimal::ONE
}

/// Aggregated ingredient requirement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedLine {
    pub item_id: String,
    pub quantity: Decimal,
    pub unit: Unit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLine {
    pub item_id: String,
    pub quantity: Decimal,
    pub unit: Unit,
    /// Latest unit cost per item base unit, minor units
    pub unit_cost: i64,
    pub cost: i64,
}

/// Theoretical plate cost of a menu item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeCost {
    pub menu_item_id: String,
    pub qty: Decimal,
    pub lines: Vec<CostLine>,
    pub total_cost: i64,
    pub price: i64,
    /// (price - cost) / price in percent, absent for free items
    pub margin_pct: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_wire_format() {
        let json = serde_json::json!({
            "type": "INGREDIENT",
            "item_id": "flour",
            "qty": "0.2",
            "unit": "kg"
        });
        let component: RecipeComponent = serde_json::from_value(json).unwrap();
        match component {
            RecipeComponent::Ingredient { item_id, unit, waste_pct, .. } => {
                assert_eq!(item_id, "flour");
                assert_eq!(unit, Unit::Kg);
                assert!(waste_pct.is_none());
            }
            other => panic!("unexpected component {other:?}"),
        }
    }

    #[test]
    fn test_prep_area_parse() {
        assert_eq!(PrepArea::parse("grill"), Some(PrepArea::Grill));
        assert_eq!(PrepArea::parse("PASTRY"), None);
    }
}
