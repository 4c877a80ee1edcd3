//! Security module
//!
//! Provider API keys live in the OS keyring, with environment variable and
//! private file fallbacks for headless hosts.

pub mod keyring;

pub use keyring::{delete_provider_key, get_provider_key, set_provider_key, validate_provider, PROVIDERS};
