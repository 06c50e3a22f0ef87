use std::path::Path;

use tracing::{info, warn};

/// Loads `config/common.env`, then the profile file, then `.secrets.env`.
/// Later files override earlier ones.
pub fn load_environment() -> Result<(), dotenvy::Error> {
    for env_file in env_files(&profile()) {
        load_env_file(env_file)?;
    }
    Ok(())
}

fn profile() -> String {
    dotenvy::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string())
}

fn env_files(profile: &str) -> [&'static str; 3] {
    if profile == "production" {
        ["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        ["config/common.env", "config/dev.env", ".secrets.env"]
    }
}

fn load_env_file(path: &str) -> Result<(), dotenvy::Error> {
    if !Path::new(path).exists() {
        warn!("Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn production_profile_selects_prod_file() {
        temp_env::with_var("ROCKET_PROFILE", Some("production"), || {
            assert_eq!(env_files(&profile())[1], "config/prod.env");
        });
    }

    #[test]
    #[serial]
    fn missing_profile_defaults_to_development() {
        temp_env::with_var_unset("ROCKET_PROFILE", || {
            assert_eq!(profile(), "development");
            assert_eq!(env_files(&profile())[1], "config/dev.env");
        });
    }

    #[test]
    fn missing_files_are_skipped() {
        assert!(load_env_file("config/does-not-exist.env").is_ok());
    }
}
