//! `choir config`: Print the default configuration.

use choir_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("# Save as {}", config_path.display());
    println!("{}", AppConfig::default_toml());
    Ok(())
}
