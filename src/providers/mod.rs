mod google;
mod registry;
mod traits;

pub use google::GoogleProvider;
pub use registry::ProviderRegistry;
pub use traits::Provider;

use crate::config::Config;
use crate::error::AuthError;

/// Register every provider enabled in the configuration.
pub fn register_defaults(registry: &mut ProviderRegistry, config: &Config) -> Result<(), AuthError> {
    if config.google_enabled {
        registry.register(Box::new(GoogleProvider::new(
            config.google_userinfo_url.clone(),
            config.provider_timeout,
        )?));
    }

    Ok(())
}
