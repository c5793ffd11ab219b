//! API key generation, file persistence, and load-or-create bootstrapping.

use crate::FleetError;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const API_KEY_LENGTH: usize = 64;
pub const API_KEY_FILE: &str = ".fleetbridge-api-key";

pub fn generate_secure_api_key() -> String {
    thread_rng().sample_iter(&Alphanumeric).take(API_KEY_LENGTH).map(char::from).collect()
}

pub fn save_api_key_to_file(api_key: &str) -> Result<(), FleetError> {
    fs::write(API_KEY_FILE, api_key).map_err(|e| FleetError::Config(format!("failed to write API key file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(API_KEY_FILE).map_err(|e| FleetError::Config(format!("failed to stat API key file: {e}")))?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(API_KEY_FILE, perms).map_err(|e| FleetError::Config(format!("failed to set API key file permissions: {e}")))?;
    }

    info!("API key saved to {API_KEY_FILE}");
    Ok(())
}

pub fn load_api_key_from_file() -> Result<Option<String>, FleetError> {
    if !Path::new(API_KEY_FILE).exists() {
        return Ok(None);
    }

    let api_key = fs::read_to_string(API_KEY_FILE).map_err(|e| FleetError::Config(format!("failed to read API key file: {e}")))?;
    let api_key = api_key.trim().to_string();

    if api_key.len() != API_KEY_LENGTH || !api_key.chars().all(|c| c.is_alphanumeric()) {
        warn!("API key file at {API_KEY_FILE} is malformed");
        return Err(FleetError::Config("invalid API key format in file".to_string()));
    }

    Ok(Some(api_key))
}

/// Uses an env-configured key if present, otherwise loads or mints one on
/// disk. The file-backed key is how a fresh deployment gets a working key
/// without any manual step.
pub fn ensure_api_key_exists(existing_api_key: Option<&str>) -> Result<String, FleetError> {
    if let Some(key) = existing_api_key {
        if !key.trim().is_empty() {
            return Ok(key.to_string());
        }
    }

    match load_api_key_from_file()? {
        Some(existing_key) => Ok(existing_key),
        None => {
            let new_key = generate_secure_api_key();
            save_api_key_to_file(&new_key)?;
            info!("generated new API key at {API_KEY_FILE}");
            Ok(new_key)
        }
    }
}
