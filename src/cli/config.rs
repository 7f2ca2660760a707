use crate::config::generate::generate_starter_config;
use crate::config::{load_config, user_config_path};
use dialoguer::Confirm;
use std::fs;
use std::path::PathBuf;

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    let path = user_config_path().ok_or("cannot determine the user config directory; use --stdout")?;

    if path.exists() {
        eprintln!("Config file already exists at {}", path.display());
        let overwrite = Confirm::new()
            .with_prompt("Overwrite it?")
            .default(false)
            .interact()?;
        if !overwrite {
            return Ok(());
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, config_content)?;

    println!("Config file written to {}", path.display());
    println!("Set GRIDCAST_TOKEN or edit remote.token before the first run.");
    Ok(())
}

pub fn validate(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.ok_or("No config file found. Use --config to specify a path.")?;

    println!("Validating config file: {}", path.display());

    match load_config(&path) {
        Ok(config) => {
            println!("✓ Config is valid");
            println!(
                "  limiter: {} sends per {:?}, {:?} minimum spacing",
                config.limiter.burst_quota, config.limiter.burst_window, config.limiter.min_spacing
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Config validation failed:\n{}", e);
            std::process::exit(1);
        }
    }
}
