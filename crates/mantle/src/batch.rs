//! Query batch lifetime around one caching resolution.

use crate::error::CacheError;
use crate::session::ObjectIdentifier;
use crate::store::DynamicWatcher;

/// An open query batch, ended when dropped.
///
/// Ending a batch garbage collects the watcher's watches that the batch did
/// not use. A failure to end is logged, not returned, since the resolution
/// result is already known by then.
pub(crate) struct QueryBatch<'a> {
    watcher: &'a dyn DynamicWatcher,
    id: &'a ObjectIdentifier,
}

impl<'a> QueryBatch<'a> {
    /// Starts a batch, failing if one is already open for `id`.
    pub(crate) fn start(
        watcher: &'a dyn DynamicWatcher,
        id: &'a ObjectIdentifier,
    ) -> Result<Self, CacheError> {
        watcher.start_query_batch(id)?;
        tracing::debug!(watcher = %id, "query batch started");
        Ok(Self { watcher, id })
    }
}

impl Drop for QueryBatch<'_> {
    fn drop(&mut self) {
        match self.watcher.end_query_batch(self.id) {
            Ok(()) => tracing::debug!(watcher = %self.id, "query batch ended"),
            Err(err) => tracing::warn!(watcher = %self.id, error = %err, "failed to end the query batch"),
        }
    }
}
