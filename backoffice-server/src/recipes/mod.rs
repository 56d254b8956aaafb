//! Menu items, recipes and the recipe expander

pub mod expand;

use rust_decimal::Decimal;
use shared::error::{AppError, ErrorCode};
use shared::models::{
    ExpandedLine, Item, MenuItem, MenuItemCreate, Recipe, RecipeComponent, RecipeCost,
    RecipeCreate, Unit,
};
use thiserror::Error;

use crate::db::tables::{ITEMS, MENU_BY_VENUE, MENU_ITEMS, RECIPES};
use crate::db::{Storage, StorageError, get_doc, load_indexed, put_doc};

pub use expand::{Catalog, ReadCatalog, WriteCatalog};

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Menu item not found: {0}")]
    MenuItemNotFound(String),

    #[error("Recipe not found: {0}")]
    RecipeNotFound(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Recipe cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Cannot convert {from} to {to} for item {item_id}")]
    UnitMismatch { item_id: String, from: Unit, to: Unit },

    #[error("{0}")]
    Invalid(String),
}

impl From<redb::TableError> for RecipeError {
    fn from(e: redb::TableError) -> Self {
        RecipeError::Storage(e.into())
    }
}

impl From<redb::StorageError> for RecipeError {
    fn from(e: redb::StorageError) -> Self {
        RecipeError::Storage(e.into())
    }
}

impl From<redb::TransactionError> for RecipeError {
    fn from(e: redb::TransactionError) -> Self {
        RecipeError::Storage(e.into())
    }
}

pub type RecipeResult<T> = Result<T, RecipeError>;

impl From<RecipeError> for AppError {
    fn from(err: RecipeError) -> Self {
        let message = err.to_string();
        match err {
            RecipeError::Storage(e) => e.into(),
            RecipeError::MenuItemNotFound(_) => {
                AppError::with_message(ErrorCode::MenuItemNotFound, message)
            }
            RecipeError::RecipeNotFound(_) => {
                AppError::with_message(ErrorCode::RecipeNotFound, message)
            }
            RecipeError::ItemNotFound(_) => AppError::with_message(ErrorCode::ItemNotFound, message),
            RecipeError::Cycle(_) => AppError::with_message(ErrorCode::RecipeCycle, message),
            RecipeError::UnitMismatch { ref item_id, .. } => {
                AppError::with_message(ErrorCode::UnitMismatch, message.clone())
                    .with_detail(format!("components.{item_id}"), message)
            }
            RecipeError::Invalid(_) => AppError::validation(message),
        }
    }
}

#[derive(Clone)]
pub struct RecipeBook {
    storage: Storage,
}

impl RecipeBook {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    // ========== Menu items ==========

    pub fn create_menu_item(&self, input: MenuItemCreate) -> RecipeResult<MenuItem> {
        let txn = self.storage.begin_write()?;
        let menu_item = {
            if let Some(recipe_id) = &input.recipe_id {
                let recipes = txn.open_table(RECIPES)?;
                if get_doc::<Recipe, _>(&recipes, recipe_id)?.is_none() {
                    return Err(RecipeError::RecipeNotFound(recipe_id.clone()));
                }
            }
            let menu_item = MenuItem {
                id: shared::util::new_id(),
                venue_id: input.venue_id,
                name: input.name,
                price: input.price,
                tax_rate_bps: input.tax_rate_bps,
                prep_area: input.prep_area,
                recipe_id: input.recipe_id,
                active: true,
            };
            let mut table = txn.open_table(MENU_ITEMS)?;
            put_doc(&mut table, &menu_item.id, &menu_item)?;
            let mut index = txn.open_table(MENU_BY_VENUE)?;
            index.insert((menu_item.venue_id.as_str(), menu_item.id.as_str()), ())?;
            menu_item
        };
        txn.commit().map_err(StorageError::from)?;
        tracing::info!(menu_item_id = %menu_item.id, prep_area = %menu_item.prep_area, "Menu item created");
        Ok(menu_item)
    }

    pub fn get_menu_item(&self, id: &str) -> RecipeResult<MenuItem> {
        self.storage
            .get(MENU_ITEMS, id)?
            .ok_or_else(|| RecipeError::MenuItemNotFound(id.to_string()))
    }

    pub fn list_menu_items(&self, venue_id: &str) -> RecipeResult<Vec<MenuItem>> {
        let read_txn = self.storage.begin_read()?;
        let index = read_txn.open_table(MENU_BY_VENUE)?;
        let docs = read_txn.open_table(MENU_ITEMS)?;
        let mut items: Vec<MenuItem> = load_indexed(&index, &docs, venue_id)?;
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    // ========== Recipes ==========

    /// Create or replace a recipe
    ///
    /// Every referenced item and sub-recipe must exist, and the new graph
    /// must stay acyclic; otherwise nothing is written.
    pub fn save_recipe(&self, input: RecipeCreate) -> RecipeResult<Recipe> {
        if input.yield_qty <= Decimal::ZERO {
            return Err(RecipeError::Invalid("yield_qty must be positive".into()));
        }
        for component in &input.components {
            let (qty, waste_pct) = match component {
                RecipeComponent::Ingredient { qty, waste_pct, .. } => (qty, waste_pct),
                RecipeComponent::SubRecipe { qty, waste_pct, .. } => (qty, waste_pct),
            };
            if *qty <= Decimal::ZERO {
                return Err(RecipeError::Invalid("component qty must be positive".into()));
            }
            if let Some(pct) = waste_pct {
                if *pct < Decimal::ZERO || *pct >= Decimal::ONE_HUNDRED {
                    return Err(RecipeError::Invalid(
                        "waste_pct must be within [0, 100)".into(),
                    ));
                }
            }
        }

        let recipe = Recipe {
            id: input.id.unwrap_or_else(shared::util::new_id),
            venue_id: input.venue_id,
            name: input.name,
            yield_qty: input.yield_qty,
            components: input.components,
        };

        let txn = self.storage.begin_write()?;
        {
            let items = txn.open_table(ITEMS)?;
            let mut recipes = txn.open_table(RECIPES)?;
            for component in &recipe.components {
                match component {
                    RecipeComponent::Ingredient { item_id, unit, .. } => {
                        let item: Item = get_doc(&items, item_id)?
                            .ok_or_else(|| RecipeError::ItemNotFound(item_id.clone()))?;
                        if unit.convert(Decimal::ONE, item.base_unit).is_none() {
                            return Err(RecipeError::UnitMismatch {
                                item_id: item.id,
                                from: *unit,
                                to: item.base_unit,
                            });
                        }
                    }
                    RecipeComponent::SubRecipe { recipe_id, .. } => {
                        if recipe_id != &recipe.id
                            && get_doc::<Recipe, _>(&recipes, recipe_id)?.is_none()
                        {
                            return Err(RecipeError::RecipeNotFound(recipe_id.clone()));
                        }
                    }
                }
            }
            put_doc(&mut recipes, &recipe.id, &recipe)?;
        }
        {
            // Walk the graph as written so far; a cycle drops the transaction
            let catalog = WriteCatalog::open_write(&txn)?;
            catalog.expand_recipe(&recipe.id, recipe.yield_qty)?;
        }
        txn.commit().map_err(StorageError::from)?;

        tracing::info!(recipe_id = %recipe.id, components = recipe.components.len(), "Recipe saved");
        Ok(recipe)
    }

    pub fn get_recipe(&self, id: &str) -> RecipeResult<Recipe> {
        self.storage
            .get(RECIPES, id)?
            .ok_or_else(|| RecipeError::RecipeNotFound(id.to_string()))
    }

    // ========== Expansion ==========

    pub fn expand(&self, menu_item_id: &str, qty: Decimal) -> RecipeResult<Vec<ExpandedLine>> {
        let read_txn = self.storage.begin_read()?;
        ReadCatalog::open(&read_txn)?.expand(menu_item_id, qty)
    }

    pub fn cost(&self, menu_item_id: &str, qty: Decimal) -> RecipeResult<RecipeCost> {
        let read_txn = self.storage.begin_read()?;
        ReadCatalog::open(&read_txn)?.cost(menu_item_id, qty)
    }
}
