//! Gourmet: a small kitchen service built on brasa.

use std::sync::Arc;

use brasa::{Claims, Error, ParamKind, RouteOptions, Server, ServerBuilder, StartupError};

pub mod dtos;
pub mod handlers;

use handlers::Pantry;

/// Directory holding the HTML views shipped with the crate.
pub const TEMPLATE_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/templates");

/// Builder with the service defaults: title, views and sign-in.
pub fn server_builder(chef_password: String) -> Result<ServerBuilder, StartupError> {
    let builder = Server::builder()
        .info("Gourmet", env!("CARGO_PKG_VERSION"), Some("Ingredients and dosings"))
        .templates(TEMPLATE_DIR, &["*.html"])?
        .auto_auth(move |user, password| {
            if user == "chef" && password == chef_password {
                Ok(Claims::new().with("sub", user))
            } else {
                Err(Error::unauthorized("invalid credentials"))
            }
        });
    Ok(builder)
}

/// Registers every route of the service on `server`.
pub fn register_routes(server: &mut Server, pantry: Arc<Pantry>) {
    handlers::hello_route(server);
    handlers::normalize_dosing_route(server);

    let p = pantry.clone();
    brasa::get(
        server,
        "/v1/ingredients",
        move |ctx| handlers::list_ingredients(p.clone(), ctx),
        RouteOptions::new()
            .tag("Ingredients")
            .summary("List ingredients")
            .query_param_with_description("limit", ParamKind::Integer, false, "maximum number of items"),
    );
    let p = pantry.clone();
    brasa::post(
        server,
        "/v1/ingredients",
        move |ctx| handlers::create_ingredient(p.clone(), ctx),
        RouteOptions::new().tag("Ingredients").summary("Add an ingredient"),
    );
    let p = pantry.clone();
    brasa::get(
        server,
        "/v1/ingredients/{id}",
        move |ctx| handlers::get_ingredient(p.clone(), ctx),
        RouteOptions::new().tag("Ingredients").summary("Show an ingredient"),
    );
    let p = pantry.clone();
    brasa::delete(
        server,
        "/v1/ingredients/{id}",
        move |ctx| handlers::delete_ingredient(p.clone(), ctx),
        RouteOptions::new().tag("Ingredients").summary("Remove an ingredient"),
    );
    brasa::get(
        server,
        "/pantry",
        move |ctx| handlers::pantry_page(pantry.clone(), ctx),
        RouteOptions::new().tag("Views").summary("Pantry page"),
    );
    brasa::get_std(server, "/health", handlers::health, RouteOptions::new().tag("Ops"));
}
