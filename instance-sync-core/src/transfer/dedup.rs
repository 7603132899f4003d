//! Content-addressable dedup check against destination storage.

use std::collections::HashSet;

use crate::contract::InstanceApi;
use crate::error::SyncError;

/// Succeeds only when the destination already stores every hash in `hashes`.
///
/// An empty batch is never considered recognised.
pub async fn ensure_hashes_recognized(
    dst: &dyn InstanceApi,
    hashes: &[String],
) -> Result<(), SyncError> {
    let wanted: HashSet<&str> = hashes.iter().map(String::as_str).collect();
    if wanted.is_empty() {
        return Err(SyncError::HashRejected { missing: 0 });
    }
    let known = dst.check_existing_hashes(hashes).await?;
    let known: HashSet<&str> = known.iter().map(String::as_str).collect();
    let missing = wanted.difference(&known).count();
    if missing > 0 {
        return Err(SyncError::HashRejected { missing });
    }
    Ok(())
}

/// Collects every hash of a batch, or `None` if any item lacks one.
pub fn all_hashes<'a, I>(hashes: I) -> Option<Vec<String>>
where
    I: IntoIterator<Item = Option<&'a String>>,
{
    hashes.into_iter().map(|h| h.cloned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockInstanceApi;

    #[tokio::test]
    async fn partially_known_batch_is_rejected() {
        let mut dst = MockInstanceApi::new();
        dst.expect_check_existing_hashes()
            .returning(|hashes: &[String]| Ok(hashes[..1].to_vec()));

        let res = ensure_hashes_recognized(&dst, &["a".to_string(), "b".to_string()]).await;
        assert!(matches!(res, Err(SyncError::HashRejected { missing: 1 })));
    }

    #[tokio::test]
    async fn fully_known_batch_passes() {
        let mut dst = MockInstanceApi::new();
        dst.expect_check_existing_hashes()
            .times(1)
            .returning(|hashes: &[String]| Ok(hashes.to_vec()));

        ensure_hashes_recognized(&dst, &["a".to_string(), "a".to_string()])
            .await
            .expect("known hashes");
    }

    #[test]
    fn missing_hash_disables_the_tier() {
        let a = "a".to_string();
        assert_eq!(all_hashes(vec![Some(&a), Some(&a)]), Some(vec![a.clone(), a.clone()]));
        assert_eq!(all_hashes(vec![Some(&a), None]), None);
    }
}
