//! Keyring integration for provider API keys
//! Lookup order: environment variable, OS keyring, then a 0600 file in the config dir

use anyhow::{Result, Context, bail};
use std::path::PathBuf;
use std::fs;

const SERVICE_NAME: &str = "call-agent";

/// Providers that need credentials
pub const PROVIDERS: &[&str] = &["completion", "synthesis", "transcription"];

/// Reject provider names that have no key slot
pub fn validate_provider(provider: &str) -> Result<()> {
    if !PROVIDERS.contains(&provider) {
        bail!("Unknown provider '{}'. Available providers: {}", provider, PROVIDERS.join(", "));
    }
    Ok(())
}

/// Environment variable consulted before the keyring, e.g. `CALL_AGENT_COMPLETION_KEY`
pub fn env_var_name(provider: &str) -> String {
    format!("CALL_AGENT_{}_KEY", provider.to_uppercase())
}

fn username(provider: &str) -> String {
    format!("{}-api-key", provider)
}

/// Get the path for the fallback key file
fn key_file_path(provider: &str) -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "call-agent", "call-agent")
        .context("Failed to get project directories")?;
    let dir = base.config_dir();
    fs::create_dir_all(dir).context("Failed to create config directory")?;
    Ok(dir.join(format!("{}_api_key.txt", provider)))
}

/// Store a provider key - tries keyring first, falls back to file
pub fn set_provider_key(provider: &str, key: &str) -> Result<()> {
    validate_provider(provider)?;

    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, &username(provider)) {
        if entry.set_password(key).is_ok() {
            return Ok(());
        }
    }

    let path = key_file_path(provider)?;
    fs::write(&path, key).context("Failed to write API key file")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .context("Failed to set file permissions")?;
    }

    println!("Note: Using file-based storage (keyring unavailable)");
    Ok(())
}

/// Get a provider key from the environment, keyring or fallback file
pub fn get_provider_key(provider: &str) -> Result<String> {
    validate_provider(provider)?;

    if let Ok(key) = std::env::var(env_var_name(provider)) {
        if !key.trim().is_empty() {
            return Ok(key.trim().to_string());
        }
    }

    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, &username(provider)) {
        if let Ok(key) = entry.get_password() {
            return Ok(key);
        }
    }

    let path = key_file_path(provider)?;
    let key = fs::read_to_string(&path).with_context(|| {
        format!(
            "No {} API key. Set {} or run 'call-agent config set-key {} <KEY>'",
            provider,
            env_var_name(provider),
            provider
        )
    })?;
    Ok(key.trim().to_string())
}

/// Delete a provider key from both keyring and file
pub fn delete_provider_key(provider: &str) -> Result<()> {
    validate_provider(provider)?;

    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, &username(provider)) {
        let _ = entry.delete_credential();
    }

    let path = key_file_path(provider)?;
    if path.exists() {
        fs::remove_file(&path).context("Failed to delete API key file")?;
    }

    Ok(())
}
