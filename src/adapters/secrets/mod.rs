//! Webhook secret provider adapters.

mod config_provider;

pub use config_provider::ConfigSecretProvider;
