use crate::config::Config;
use crate::security::Vault;
use crate::settings::SettingsStore;
use crate::sync::{Catalog, SharedCatalog};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    if let Some(ref command) = std::env::args().nth(1) {
        if command == "vault-set" {
            return handle_vault_set(&config);
        }
        if command == "vault-get" {
            return handle_vault_get(&config);
        }
        if command == "vault-list" {
            return handle_vault_list(&config);
        }
        if command == "config-init" {
            return handle_config_init();
        }
    }

    let vault = Arc::new(Mutex::new(Vault::new(config.vault.path.as_deref())?));
    let settings = SettingsStore::new(vault);

    let bot_connected =
        crate::bot::spawn_manager(settings.clone(), config.discord.status_refresh_secs);

    let catalog_path = config
        .sync
        .data_path
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(crate::sync::default_data_path);
    let catalog: SharedCatalog = Arc::new(Mutex::new(Catalog::load(&catalog_path)));
    if config.sync.enabled {
        crate::sync::spawn_scheduler(
            settings.clone(),
            catalog.clone(),
            catalog_path,
            config.sync.interval_secs,
        );
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("admin panel available at http://{}/", addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::select! {
        res = crate::server::start(addr, settings, bot_connected, catalog, shutdown_rx) => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown: ctrl-c");
            let _ = shutdown_tx.send(true);
            Ok(())
        }
    }
}

fn handle_vault_set(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(2);
    let key = args.next().ok_or("missing key")?;
    let value = args.next().ok_or("missing value")?;

    let mut vault = Vault::new(config.vault.path.as_deref())?;
    vault.store(&key, &value)?;

    println!("Stored vault key: {}", key);
    Ok(())
}

fn handle_vault_get(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(2);
    let key = args.next().ok_or("missing key")?;

    let vault = Vault::new(config.vault.path.as_deref())?;
    let value = vault.retrieve(&key)?;

    println!("{}", value);
    Ok(())
}

fn handle_vault_list(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let vault = Vault::new(config.vault.path.as_deref())?;
    for key in vault.list_keys() {
        println!("{}", key);
    }
    Ok(())
}

fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
