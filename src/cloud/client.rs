use std::sync::Arc;

use anyhow::{Context, Result};
use log::warn;
use rusoto_core::Region;
use rusoto_s3::S3Client;

/// Resolve a region name, falling back to the default region
pub fn resolve_region(region_name: Option<&str>) -> Region {
    match region_name {
        Some(name) => {
            match name.parse::<Region>() {
                Ok(r) => r,
                Err(_) => {
                    warn!("Invalid region '{}', using default", name);
                    Region::default()
                }
            }
        },
        None => Region::default(),
    }
}

/// Create an S3 client with the specified region and profile.
///
/// Credentials come from the standard AWS chain, or from the named profile
/// when one is given.
pub fn create_s3_client(region_name: Option<&str>, profile: Option<&str>) -> Result<Arc<S3Client>> {
    let region = resolve_region(region_name);

    let s3_client = if let Some(profile_name) = profile {
        match rusoto_credential::ProfileProvider::new() {
            Ok(mut provider) => {
                provider.set_profile(profile_name);
                let http_client = rusoto_core::HttpClient::new()
                    .context("Failed to create HTTP client")?;
                Arc::new(S3Client::new_with(http_client, provider, region))
            },
            Err(e) => {
                warn!("Failed to create AWS profile provider: {}, using default", e);
                Arc::new(S3Client::new(region))
            }
        }
    } else {
        Arc::new(S3Client::new(region))
    };

    Ok(s3_client)
}
