use anyhow::Result;
use log::info;

mod account;
mod api;
mod auth;
mod config;
mod db;
mod error;
mod schema;
mod utils;
mod web;

#[actix_web::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = config::Config::from_env()?;
    let db = db::Db::connect(&config.database_url)?;
    info!("Opened database {}", config.database_url);

    web::new_http_server(config, db).await?;
    Ok(())
}
