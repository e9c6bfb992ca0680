//! Age-based expiry of messages that keep failing.

use postq_common::tracing;
use postq_queue::MessageStore;

use crate::error::DeliveryError;

/// Remove attempted messages created more than `max_age_secs` before `now`
///
/// Never-attempted messages are kept however old they are. A `max_age_secs`
/// of zero disables expiry.
///
/// # Errors
/// If the store cannot be scanned or a message cannot be removed
pub async fn expire(
    store: &dyn MessageStore,
    max_age_secs: u64,
    now: u64,
) -> Result<usize, DeliveryError> {
    if max_age_secs == 0 {
        return Ok(0);
    }

    let removed = store
        .expire_older_than(now.saturating_sub(max_age_secs), true)
        .await?;

    if removed > 0 {
        tracing::info!(removed, max_age_secs, "Expired old messages");
    }

    Ok(removed)
}
