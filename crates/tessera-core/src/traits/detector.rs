//! Detector adapter trait.

use async_trait::async_trait;

use crate::error::DetectResult;
use crate::types::{PageInput, Zone};

/// Core DetectorAdapter trait - every detection method implements this.
///
/// An adapter is read-only with respect to the page and may run concurrently
/// with other adapters on the same page. Class labels must already be
/// normalized to the engine's vocabulary. Returning no zones is valid.
#[async_trait]
pub trait DetectorAdapter: Send + Sync {
    /// Identifier recorded as `source_adapter` on every zone produced.
    fn name(&self) -> &str;

    /// Detect candidate zones on one page.
    async fn detect(&self, page: &PageInput) -> DetectResult<Vec<Zone>>;
}
