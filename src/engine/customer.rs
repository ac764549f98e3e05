use crate::error::StoreError;
use crate::mobile::NormalizedMobile;
use crate::store::{CardTypeCatalog, CustomerDirectory, CustomerIdentity, NewCustomer};

use tracing::{debug, info, warn};

/// Returns the customer registered under `mobile`, creating it on first sight.
///
/// Existing customers are returned as-is, even when they belong to another
/// branch. A catalog failure while looking up the default tier is not fatal:
/// the customer is created without a card type.
pub async fn resolve_customer(
    directory: &dyn CustomerDirectory,
    catalog: &dyn CardTypeCatalog,
    mobile: &NormalizedMobile,
    branch_id: &str,
) -> Result<CustomerIdentity, StoreError> {
    if let Some(existing) = directory.find_by_mobile(mobile).await? {
        debug!(customer_id = %existing.id, %mobile, "found existing customer");
        return Ok(existing);
    }

    let card_type_id = match catalog.find_default_tier().await {
        Ok(tier) => tier,
        Err(e) => {
            warn!(%mobile, "default card tier unavailable: {e}");
            None
        }
    };

    let created = directory
        .create(NewCustomer::unregistered(mobile, branch_id, card_type_id))
        .await?;
    info!(customer_id = %created.id, %mobile, branch_id, "created customer");
    Ok(created)
}
