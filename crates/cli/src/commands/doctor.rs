//! `choir doctor`: Diagnose configuration and service health.

use choir_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("Choir Doctor — System Diagnostics");
    println!("=================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  ✅ Config file found at {}", config_path.display());
    } else {
        println!("  ⚠️  No config file — using defaults (see `choir config`)");
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  1 issue found. Fix the config before running other checks.");
            return Ok(());
        }
    };

    if config.has_api_key() {
        println!("  ✅ API key configured");
    } else {
        println!("  ⚠️  No API key — set CHOIR_API_KEY or OPENAI_API_KEY");
        issues += 1;
    }

    let provider = choir_providers::build_from_config(&config);
    match provider.health_check().await {
        Ok(true) => println!("  ✅ Provider '{}' reachable", provider.name()),
        Ok(false) => {
            println!("  ⚠️  Provider '{}' reported unhealthy", provider.name());
            issues += 1;
        }
        Err(e) => {
            println!("  ❌ Provider '{}' unreachable: {e}", provider.name());
            issues += 1;
        }
    }

    let store = choir_memory::build_from_config(&config);
    match store.health_check().await {
        Ok(true) => println!("  ✅ Vector store '{}' reachable", store.name()),
        Ok(false) => {
            println!("  ⚠️  Vector store '{}' reported unhealthy", store.name());
            issues += 1;
        }
        Err(e) => {
            println!("  ❌ Vector store '{}' unreachable: {e}", store.name());
            issues += 1;
        }
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
