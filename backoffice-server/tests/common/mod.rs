#![allow(dead_code)]

use async_trait::async_trait;
use backoffice_server::auth::Claims;
use backoffice_server::core::{Config, ServerState};
use backoffice_server::db::Storage;
use backoffice_server::observability::{ReplayCall, ReplayReply, Replayer};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use shared::models::{
    AddItem, CreateOrder, Item, ItemCreate, MenuItem, MenuItemCreate, Order, PrepArea,
    RecipeComponent, RecipeCreate, StockPolicy, Unit,
};
use std::sync::Arc;
use tempfile::TempDir;

/// Answers every replay with a fixed status and keeps the calls
pub struct RecordingReplayer {
    pub status: Mutex<u16>,
    pub calls: Mutex<Vec<ReplayCall>>,
}

#[async_trait]
impl Replayer for RecordingReplayer {
    async fn replay(&self, call: &ReplayCall) -> Result<ReplayReply, String> {
        self.calls.lock().push(call.clone());
        let status_code = *self.status.lock();
        Ok(ReplayReply {
            status_code,
            body: json!({ "ok": status_code < 400 }),
        })
    }
}

pub struct Harness {
    pub state: ServerState,
    pub replayer: Arc<RecordingReplayer>,
    _dir: TempDir,
}

pub fn harness() -> Harness {
    harness_with(|_| {})
}

pub fn harness_with(configure: impl FnOnce(&mut Config)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::for_tests(dir.path().to_string_lossy().to_string());
    configure(&mut config);
    let replayer = Arc::new(RecordingReplayer {
        status: Mutex::new(201),
        calls: Mutex::new(Vec::new()),
    });
    let state =
        ServerState::with_storage(config, Storage::open_in_memory().unwrap(), replayer.clone())
            .unwrap();
    Harness {
        state,
        replayer,
        _dir: dir,
    }
}

/// Bearer header for a user of `venue_id` with every permission
pub fn bearer(state: &ServerState, user_id: &str, venue_id: &str) -> String {
    let jwt = &state.config.jwt;
    let now = chrono::Utc::now();
    let claims = Claims {
        sub: user_id.into(),
        name: "Test".into(),
        venue_id: venue_id.into(),
        role: "manager".into(),
        permissions: vec!["all".into()],
        exp: (now + chrono::Duration::minutes(10)).timestamp(),
        iat: now.timestamp(),
        iss: jwt.issuer.clone(),
        aud: jwt.audience.clone(),
    };
    let key = EncodingKey::from_secret(jwt.secret.as_bytes());
    let token = encode(&Header::new(Algorithm::HS256), &claims, &key).unwrap();
    format!("Bearer {token}")
}

pub fn stock_item(state: &ServerState, venue_id: &str, name: &str) -> Item {
    state
        .stock
        .create_item(ItemCreate {
            venue_id: venue_id.into(),
            name: name.into(),
            base_unit: Unit::Each,
            reorder_point: Decimal::ZERO,
            reorder_qty: Decimal::ZERO,
            cost: 0,
            stock_policy: Some(StockPolicy::AllowNegative),
            auto_reorder: false,
        })
        .unwrap()
}

/// Menu item drawing `per_portion` of `item_id` through a one-line recipe
pub fn dish(
    state: &ServerState,
    venue_id: &str,
    item_id: &str,
    per_portion: Decimal,
    price: i64,
) -> MenuItem {
    let recipe = state
        .recipes
        .save_recipe(RecipeCreate {
            id: None,
            venue_id: venue_id.into(),
            name: "House recipe".into(),
            yield_qty: Decimal::ONE,
            components: vec![RecipeComponent::Ingredient {
                item_id: item_id.into(),
                qty: per_portion,
                unit: Unit::Each,
                waste_pct: None,
            }],
        })
        .unwrap();
    state
        .recipes
        .create_menu_item(MenuItemCreate {
            venue_id: venue_id.into(),
            name: "House dish".into(),
            price,
            tax_rate_bps: 0,
            prep_area: PrepArea::Grill,
            recipe_id: Some(recipe.id),
        })
        .unwrap()
}

pub fn open_order(state: &ServerState, venue_id: &str) -> Order {
    let session = state.orders.open_session(venue_id, "waiter").unwrap();
    state
        .orders
        .create_order(
            CreateOrder {
                session_id: session.id,
                table_id: Some("t1".into()),
                discount: 0,
            },
            "waiter",
        )
        .unwrap()
}

pub fn add_line(state: &ServerState, order_id: &str, menu_item_id: &str, qty: u32) -> Order {
    state
        .orders
        .add_item(
            order_id,
            AddItem {
                menu_item_id: menu_item_id.into(),
                qty,
                seat_no: None,
                course_no: None,
                instructions: None,
            },
        )
        .unwrap()
}
