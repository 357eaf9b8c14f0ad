//! `deskpilot doctor`: Diagnose configuration and storage.

use deskpilot_config::AppConfig;
use deskpilot_core::{PolicyProvider, SessionStore};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 deskpilot Doctor — System Diagnostics");
    println!("=======================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  ✅ Config file found");
    } else {
        println!("  ⚠️  No config file — run `deskpilot init` (using defaults)");
        issues += 1;
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  Fix the config before running further checks.");
            return Ok(());
        }
    };

    match config.require_api_key() {
        Ok(_) => println!("  ✅ API key configured for '{}'", config.default_provider),
        Err(e) => {
            println!("  ❌ {e}");
            if let Some(hint) = e.hint() {
                println!("     {hint}");
            }
            issues += 1;
        }
    }

    match config.require_backend_url() {
        Ok(url) => println!("  ✅ Commerce backend: {url}"),
        Err(e) => {
            println!("  ⚠️  {e}");
            if let Some(hint) = e.hint() {
                println!("     {hint}");
            }
            issues += 1;
        }
    }

    match deskpilot_sessions::store_from_config(&config).await {
        Ok(store) => match store.count().await {
            Ok(n) => println!("  ✅ Session store '{}' ({n} session(s))", store.name()),
            Err(e) => {
                println!("  ❌ Session store '{}' unreadable: {e}", store.name());
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ Session store unavailable: {e}");
            issues += 1;
        }
    }

    let rules = deskpilot_config::policy_provider(&config).active_policies().await;
    if rules.is_empty() {
        println!("  ⚠️  No active policy rules — replies will not cite any policy");
    } else {
        println!("  ✅ {} active policy rule(s)", rules.len());
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
