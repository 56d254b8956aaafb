//! Recipe expansion and costing
//!
//! `effective_qty = net_qty × (1 + waste_pct/100)`, scaled by the ordered
//! portions over the recipe yield, walked recursively through sub-recipes.
//! Lines are aggregated per stock item in the item's base unit.

use redb::{ReadTransaction, ReadOnlyTable, ReadableTable, Table, WriteTransaction};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use shared::models::{
    CostLine, ExpandedLine, Item, MenuItem, Recipe, RecipeComponent, RecipeCost, Unit,
};
use std::collections::BTreeMap;

use super::{RecipeError, RecipeResult};
use crate::db::get_doc;
use crate::db::tables::{ITEMS, MENU_ITEMS, RECIPES};

/// Decimal places kept on expanded quantities
const QTY_SCALE: u32 = 4;

type Doc = &'static [u8];

/// Read view over menu items, recipes and stock items
pub struct Catalog<M, R, I> {
    menu: M,
    recipes: R,
    items: I,
}

pub type ReadCatalog = Catalog<ReadOnlyTable<&'static str, Doc>, ReadOnlyTable<&'static str, Doc>, ReadOnlyTable<&'static str, Doc>>;

pub type WriteCatalog<'t> = Catalog<Table<'t, &'static str, Doc>, Table<'t, &'static str, Doc>, Table<'t, &'static str, Doc>>;

impl ReadCatalog {
    pub fn open(txn: &ReadTransaction) -> RecipeResult<Self> {
        Ok(Self {
            menu: txn.open_table(MENU_ITEMS)?,
            recipes: txn.open_table(RECIPES)?,
            items: txn.open_table(ITEMS)?,
        })
    }
}

impl<'t> WriteCatalog<'t> {
    /// Holds ITEMS open: drop before stock mutations in the same transaction
    pub fn open_write(txn: &'t WriteTransaction) -> RecipeResult<Self> {
        Ok(Self {
            menu: txn.open_table(MENU_ITEMS)?,
            recipes: txn.open_table(RECIPES)?,
            items: txn.open_table(ITEMS)?,
        })
    }
}

impl<M, R, I> Catalog<M, R, I>
where
    M: ReadableTable<&'static str, Doc>,
    R: ReadableTable<&'static str, Doc>,
    I: ReadableTable<&'static str, Doc>,
{
    pub fn menu_item(&self, id: &str) -> RecipeResult<MenuItem> {
        get_doc(&self.menu, id)?.ok_or_else(|| RecipeError::MenuItemNotFound(id.to_string()))
    }

    pub fn recipe(&self, id: &str) -> RecipeResult<Recipe> {
        get_doc(&self.recipes, id)?.ok_or_else(|| RecipeError::RecipeNotFound(id.to_string()))
    }

    pub fn item(&self, id: &str) -> RecipeResult<Item> {
        get_doc(&self.items, id)?.ok_or_else(|| RecipeError::ItemNotFound(id.to_string()))
    }

    /// Stock requirements for `qty` portions of a menu item
    ///
    /// A menu item without a recipe draws no stock.
    pub fn expand(&self, menu_item_id: &str, qty: Decimal) -> RecipeResult<Vec<ExpandedLine>> {
        let menu_item = self.menu_item(menu_item_id)?;
        match &menu_item.recipe_id {
            Some(recipe_id) => self.expand_recipe(recipe_id, qty),
            None => Ok(Vec::new()),
        }
    }

    /// Stock requirements for `portions` of a recipe's yield
    pub fn expand_recipe(&self, recipe_id: &str, portions: Decimal) -> RecipeResult<Vec<ExpandedLine>> {
        let mut totals: BTreeMap<String, (Decimal, Unit)> = BTreeMap::new();
        let mut stack = Vec::new();
        self.walk(recipe_id, portions, &mut stack, &mut totals)?;

        Ok(totals
            .into_iter()
            .map(|(item_id, (quantity, unit))| ExpandedLine {
                item_id,
                quantity: quantity
                    .round_dp_with_strategy(QTY_SCALE, RoundingStrategy::MidpointAwayFromZero)
                    .normalize(),
                unit,
            })
            .collect())
    }

    fn walk(
        &self,
        recipe_id: &str,
        portions: Decimal,
        stack: &mut Vec<String>,
        totals: &mut BTreeMap<String, (Decimal, Unit)>,
    ) -> RecipeResult<()> {
        if stack.iter().any(|id| id == recipe_id) {
            let mut path = stack.clone();
            path.push(recipe_id.to_string());
            return Err(RecipeError::Cycle(path));
        }
        let recipe = self.recipe(recipe_id)?;
        if recipe.yield_qty <= Decimal::ZERO {
            return Err(RecipeError::Invalid(format!(
                "recipe {} has non-positive yield",
                recipe.id
            )));
        }
        let batches = portions / recipe.yield_qty;

        stack.push(recipe.id.clone());
        for component in &recipe.components {
            match component {
                RecipeComponent::Ingredient {
                    item_id,
                    qty,
                    unit,
                    waste_pct,
                } => {
                    let item = self.item(item_id)?;
                    let net = *qty * waste_factor(*waste_pct) * batches;
                    let base = unit.convert(net, item.base_unit).ok_or_else(|| {
                        RecipeError::UnitMismatch {
                            item_id: item.id.clone(),
                            from: *unit,
                            to: item.base_unit,
                        }
                    })?;
                    let entry = totals
                        .entry(item.id.clone())
                        .or_insert((Decimal::ZERO, item.base_unit));
                    entry.0 += base;
                }
                RecipeComponent::SubRecipe {
                    recipe_id,
                    qty,
                    waste_pct,
                } => {
                    let sub_portions = *qty * waste_factor(*waste_pct) * batches;
                    self.walk(recipe_id, sub_portions, stack, totals)?;
                }
            }
        }
        stack.pop();
        Ok(())
    }

    /// Theoretical cost of `qty` portions at each ingredient's latest cost
    pub fn cost(&self, menu_item_id: &str, qty: Decimal) -> RecipeResult<RecipeCost> {
        let menu_item = self.menu_item(menu_item_id)?;
        let lines = self.expand(menu_item_id, qty)?;

        let mut cost_lines = Vec::with_capacity(lines.len());
        let mut total_cost = 0i64;
        for line in lines {
            let item = self.item(&line.item_id)?;
            let cost = (line.quantity * Decimal::from(item.cost))
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
                .unwrap_or(i64::MAX);
            total_cost = total_cost.saturating_add(cost);
            cost_lines.push(CostLine {
                item_id: line.item_id,
                quantity: line.quantity,
                unit: line.unit,
                unit_cost: item.cost,
                cost,
            });
        }

        let price = (Decimal::from(menu_item.price) * qty)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .unwrap_or(i64::MAX);
        let margin_pct = (price > 0).then(|| {
            (Decimal::from(price - total_cost) * Decimal::ONE_HUNDRED / Decimal::from(price))
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        });

        Ok(RecipeCost {
            menu_item_id: menu_item.id,
            qty,
            lines: cost_lines,
            total_cost,
            price,
            margin_pct,
        })
    }
}

fn waste_factor(waste_pct: Option<Decimal>) -> Decimal {
    match waste_pct {
        Some(pct) => Decimal::ONE + pct / Decimal::ONE_HUNDRED,
        None => Decimal::ONE,
    }
}
