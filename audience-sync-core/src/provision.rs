//! Audience provisioning: reuse an indexed audience or create a new one.

use tracing::info;

use crate::contract::{
    AdsPlatform, AudienceHandle, AudienceSubtype, CustomerFileSource, NewCustomAudience,
};
use crate::error::SyncError;
use crate::resolve::AudienceIndex;

pub const AUDIENCE_DESCRIPTION: &str =
    "This audience list is extracted from the O2O master table based on the segmentation rule provided";

/// Parameters used for every audience this crate creates.
pub fn new_audience_request(audience_name: &str) -> NewCustomAudience {
    NewCustomAudience {
        name: audience_name.to_string(),
        description: AUDIENCE_DESCRIPTION.to_string(),
        subtype: AudienceSubtype::Custom,
        customer_file_source: CustomerFileSource::UserProvidedOnly,
    }
}

/// Return a handle to the audience called `audience_name`.
///
/// An indexed name is trusted as-is and costs no platform call. Otherwise
/// exactly one audience is created. Creation is never rolled back.
pub async fn provision_audience<A>(
    ads: &A,
    ad_account_id: &str,
    audience_name: &str,
    index: &AudienceIndex,
) -> Result<AudienceHandle, SyncError>
where
    A: AdsPlatform + ?Sized,
{
    if let Some(id) = index.get(audience_name) {
        info!(audience_name, audience_id = id, "[PROVISION] Reusing existing audience");
        return Ok(AudienceHandle::new(id));
    }

    let request = new_audience_request(audience_name);
    let handle = ads
        .create_custom_audience(ad_account_id, &request)
        .await
        .map_err(|e| SyncError::ads(format!("create custom audience '{audience_name}'"), e))?;
    info!(
        audience_name,
        audience_id = %handle.id,
        "[PROVISION] Created custom audience"
    );
    Ok(handle)
}
