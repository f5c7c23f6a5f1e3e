use std::sync::Arc;

use gourmet::handlers::Pantry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let password = std::env::var("GOURMET_CHEF_PASSWORD").unwrap_or_else(|_| "chef".to_string());
    let mut builder = gourmet::server_builder(password)?.addr(":3000").addr_from_env();
    if let Ok(secret) = std::env::var("GOURMET_JWT_SECRET") {
        builder = builder.jwt_secret(secret);
    }

    let mut server = builder.build();
    gourmet::register_routes(&mut server, Arc::new(Pantry::new()));
    server.run().await?;
    Ok(())
}
