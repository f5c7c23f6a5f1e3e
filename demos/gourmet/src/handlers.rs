use std::collections::BTreeMap;
use std::sync::Arc;

use brasa::{api, header, Context, Error, HeaderValue, StatusCode, Template, ValidationError};
use parking_lot::Mutex;
use serde::Serialize;

use crate::dtos::{Dosing, Greeting, Ingredient, NewIngredient};

/// In-memory ingredient store.
#[derive(Debug, Default)]
pub struct Pantry {
    inner: Mutex<PantryState>,
}

#[derive(Debug, Default)]
struct PantryState {
    next_id: u64,
    items: BTreeMap<u64, Ingredient>,
}

impl Pantry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, new: NewIngredient) -> Ingredient {
        let mut state = self.inner.lock();
        state.next_id += 1;
        let ingredient = Ingredient {
            id: state.next_id,
            name: new.name,
            dosing: new.dosing,
            supplier: new.supplier,
        };
        state.items.insert(ingredient.id, ingredient.clone());
        ingredient
    }

    pub fn get(&self, id: u64) -> Option<Ingredient> {
        self.inner.lock().items.get(&id).cloned()
    }

    pub fn list(&self) -> Vec<Ingredient> {
        self.inner.lock().items.values().cloned().collect()
    }

    pub fn remove(&self, id: u64) -> Option<Ingredient> {
        self.inner.lock().items.remove(&id)
    }
}

fn ingredient_id(ctx: &Context) -> Result<u64, Error> {
    let raw = ctx.path_param("id").unwrap_or_default();
    raw.parse()
        .map_err(|_| Error::from(ValidationError::field("id", format!("expected a number, got `{raw}`"))))
}

/// Returns a simple greeting.
#[api(GET, "/v1/hello", tag = "Kitchen")]
pub async fn hello(_ctx: Context) -> Result<Greeting, Error> {
    Ok(Greeting {
        message: "Bem-vindo à cozinha!".to_string(),
    })
}

/// Converts a dosing to its base unit
///
/// Kilograms and milligrams become grams, litres become millilitres.
#[api(POST, "/v1/dosings/normalize", tag = "Kitchen")]
pub async fn normalize_dosing(ctx: Context<Dosing>) -> Result<Dosing, Error> {
    let dosing = ctx.into_body().await?;
    Ok(dosing.to_base_unit())
}

pub async fn list_ingredients(pantry: Arc<Pantry>, ctx: Context) -> Result<Vec<Ingredient>, Error> {
    let mut items = pantry.list();
    if let Some(limit) = ctx.query_param_int("limit")? {
        items.truncate(limit.max(0) as usize);
    }
    Ok(items)
}

pub async fn get_ingredient(pantry: Arc<Pantry>, ctx: Context) -> Result<Ingredient, Error> {
    let id = ingredient_id(&ctx)?;
    pantry
        .get(id)
        .ok_or_else(|| Error::not_found(format!("ingredient {id} not found")))
}

pub async fn create_ingredient(pantry: Arc<Pantry>, mut ctx: Context<NewIngredient>) -> Result<Ingredient, Error> {
    let new = ctx.body().await?.clone();
    let ingredient = pantry.insert(new);
    tracing::info!(id = ingredient.id, name = %ingredient.name, "ingredient added");

    ctx.set_status(StatusCode::CREATED);
    if let Ok(location) = HeaderValue::from_str(&format!("/v1/ingredients/{}", ingredient.id)) {
        ctx.set_header(header::LOCATION, location);
    }
    Ok(ingredient)
}

pub async fn delete_ingredient(pantry: Arc<Pantry>, ctx: Context) -> Result<Ingredient, Error> {
    let id = ingredient_id(&ctx)?;
    pantry
        .remove(id)
        .ok_or_else(|| Error::not_found(format!("ingredient {id} not found")))
}

#[derive(Serialize)]
struct PantryView {
    title: &'static str,
    items: Vec<Ingredient>,
}

pub async fn pantry_page(pantry: Arc<Pantry>, _ctx: Context) -> Result<Template, Error> {
    Ok(Template::new(
        "pantry.html",
        &PantryView {
            title: "Pantry",
            items: pantry.list(),
        },
    ))
}

pub async fn health() -> &'static str {
    "ok"
}
