//! Runs a fixed list of adapters against each page.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use tessera_core::{
    AdapterError, AdapterErrorKind, DetectionConfig, DetectorAdapter, DetectResult, DocumentInput,
    PageInput, Zone,
};

use crate::DetectorFactory;

/// Raw detections for one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageDetections {
    pub page: u32,
    /// Zones from every adapter that succeeded, in adapter order.
    pub zones: Vec<Zone>,
    /// Adapters skipped for this page.
    pub failures: Vec<AdapterError>,
    /// Every adapter failed, so the (empty) zone list needs a human look.
    pub needs_review: bool,
}

/// Per-page adapter fan-out.
///
/// Adapters for a page run concurrently, each in its own task and under its
/// own timeout. A failing, stalled or panicking adapter only loses its own
/// contribution for that page. Pages of a document are detected
/// `page_concurrency` at a time, and an adapter that times out is skipped
/// for the rest of the document unless that is switched off.
pub struct DetectionCoordinator {
    adapters: Vec<Arc<dyn DetectorAdapter>>,
    timeout: Duration,
    page_concurrency: usize,
    disable_after_timeout: bool,
}

impl DetectionCoordinator {
    pub fn new(adapters: Vec<Arc<dyn DetectorAdapter>>, timeout: Duration) -> Self {
        Self {
            adapters,
            timeout,
            page_concurrency: 1,
            disable_after_timeout: true,
        }
    }

    /// Build the adapters named in the configuration.
    pub fn from_config(config: &DetectionConfig) -> DetectResult<Self> {
        Ok(Self::new(DetectorFactory::from_config(config)?, config.adapter_timeout())
            .with_page_concurrency(config.page_concurrency)
            .with_disable_after_timeout(config.disable_after_timeout))
    }

    pub fn with_page_concurrency(mut self, pages: usize) -> Self {
        self.page_concurrency = pages.max(1);
        self
    }

    pub fn with_disable_after_timeout(mut self, disable: bool) -> Self {
        self.disable_after_timeout = disable;
        self
    }

    pub fn adapter_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Detect one page with every adapter.
    pub async fn detect_page(&self, page: &PageInput) -> PageDetections {
        let disabled: Vec<AtomicBool> = self.adapters.iter().map(|_| AtomicBool::new(false)).collect();
        self.detect_page_with(page, &disabled).await
    }

    async fn detect_page_with(&self, page: &PageInput, disabled: &[AtomicBool]) -> PageDetections {
        let shared = Arc::new(page.clone());
        let tasks = self.adapters.iter().zip(disabled).map(|(adapter, off)| {
            let skip = off.load(Ordering::Acquire);
            let adapter = Arc::clone(adapter);
            let page = Arc::clone(&shared);
            let timeout = self.timeout;
            async move {
                if skip {
                    return None;
                }
                Some(tokio::spawn(async move { tokio::time::timeout(timeout, adapter.detect(&page)).await }).await)
            }
        });
        let results = join_all(tasks).await;

        let mut detections = PageDetections {
            page: page.index,
            ..Default::default()
        };
        for ((adapter, off), joined) in self.adapters.iter().zip(disabled).zip(results) {
            let kind = match joined {
                None => AdapterErrorKind::Disabled,
                Some(Ok(Ok(Ok(zones)))) => {
                    debug!(page = page.index, adapter = adapter.name(), zones = zones.len(), "adapter finished");
                    detections.zones.extend(zones);
                    continue;
                }
                Some(Ok(Ok(Err(e)))) => AdapterErrorKind::Failed(e.to_string()),
                Some(Ok(Err(_))) => {
                    if self.disable_after_timeout && !off.swap(true, Ordering::AcqRel) {
                        warn!(
                            page = page.index,
                            adapter = adapter.name(),
                            "adapter timed out; skipping it for the rest of the document"
                        );
                    }
                    AdapterErrorKind::Timeout(self.timeout)
                }
                Some(Err(e)) if e.is_panic() => AdapterErrorKind::Panicked(e.to_string()),
                Some(Err(e)) => AdapterErrorKind::Failed(e.to_string()),
            };
            let error = AdapterError::new(adapter.name(), page.index, kind);
            warn!(
                page = page.index,
                adapter = adapter.name(),
                code = error.code().as_str(),
                "skipping adapter output: {}",
                error
            );
            detections.failures.push(error);
        }

        if !self.adapters.is_empty() && detections.failures.len() == self.adapters.len() {
            warn!(page = page.index, "every adapter failed; page flagged for review");
            detections.needs_review = true;
        }
        detections
    }

    /// Detect every page of a document. Results follow page order.
    pub async fn detect_document(&self, document: &DocumentInput) -> Vec<PageDetections> {
        let disabled: Vec<AtomicBool> = self.adapters.iter().map(|_| AtomicBool::new(false)).collect();
        stream::iter(0..document.pages.len())
            .map(|i| self.detect_page_with(&document.pages[i], &disabled))
            .buffered(self.page_concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tessera_core::{BBox, DetectError};

    enum Behavior {
        Zones(usize),
        Fail,
        Stall,
        Panic,
    }

    struct StubAdapter {
        name: String,
        behavior: Behavior,
    }

    impl StubAdapter {
        fn arc(name: &str, behavior: Behavior) -> Arc<dyn DetectorAdapter> {
            Arc::new(Self {
                name: name.to_string(),
                behavior,
            })
        }
    }

    #[async_trait]
    impl DetectorAdapter for StubAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn detect(&self, page: &PageInput) -> DetectResult<Vec<Zone>> {
            match self.behavior {
                Behavior::Zones(n) => Ok((0..n)
                    .map(|i| {
                        let x = i as f64 * 100.0;
                        Zone::new(
                            format!("{}:{}", self.name, i),
                            page.index,
                            BBox::new(x, 0.0, x + 50.0, 50.0),
                            "table",
                            0.9,
                            &self.name,
                        )
                    })
                    .collect()),
                Behavior::Fail => Err(DetectError::Failed("model not loaded".to_string())),
                Behavior::Stall => {
                    tokio::time::sleep(Duration::from_secs(3_600)).await;
                    Ok(Vec::new())
                }
                Behavior::Panic => panic!("adapter bug"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_adapter_is_skipped() {
        let coordinator = DetectionCoordinator::new(
            vec![StubAdapter::arc("a", Behavior::Stall), StubAdapter::arc("b", Behavior::Zones(2))],
            Duration::from_secs(5),
        );
        let detections = coordinator.detect_page(&PageInput::new(7)).await;

        assert_eq!(detections.page, 7);
        assert_eq!(detections.zones.len(), 2);
        assert!(detections.zones.iter().all(|z| z.source_adapter() == "b"));
        assert_eq!(detections.failures.len(), 1);
        assert_eq!(detections.failures[0].adapter, "a");
        assert!(detections.failures[0].is_timeout());
        assert!(!detections.needs_review);
    }

    #[tokio::test]
    async fn test_failing_and_panicking_adapters_are_absorbed() {
        let coordinator = DetectionCoordinator::new(
            vec![
                StubAdapter::arc("a", Behavior::Fail),
                StubAdapter::arc("b", Behavior::Panic),
                StubAdapter::arc("c", Behavior::Zones(1)),
            ],
            Duration::from_secs(5),
        );
        let detections = coordinator.detect_page(&PageInput::new(0)).await;

        assert_eq!(detections.zones.len(), 1);
        let kinds: Vec<&AdapterErrorKind> = detections.failures.iter().map(|f| &f.kind).collect();
        assert!(matches!(kinds[0], AdapterErrorKind::Failed(m) if m.contains("model not loaded")));
        assert!(matches!(kinds[1], AdapterErrorKind::Panicked(_)));
    }

    #[tokio::test]
    async fn test_all_adapters_failing_flags_page() {
        let coordinator = DetectionCoordinator::new(
            vec![StubAdapter::arc("a", Behavior::Fail), StubAdapter::arc("b", Behavior::Fail)],
            Duration::from_secs(5),
        );
        let detections = coordinator.detect_page(&PageInput::new(4)).await;
        assert!(detections.zones.is_empty());
        assert!(detections.needs_review);
    }

    #[tokio::test]
    async fn test_zero_zones_is_not_a_failure() {
        let coordinator =
            DetectionCoordinator::new(vec![StubAdapter::arc("a", Behavior::Zones(0))], Duration::from_secs(5));
        let detections = coordinator.detect_page(&PageInput::new(0)).await;
        assert!(detections.failures.is_empty());
        assert!(!detections.needs_review);
    }

    fn long_document(pages: u32) -> DocumentInput {
        (0..pages).fold(DocumentInput::new("long"), |doc, i| doc.with_page(PageInput::new(i)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_adapter_is_disabled_for_the_document() {
        let coordinator = DetectionCoordinator::new(
            vec![StubAdapter::arc("slow", Behavior::Stall), StubAdapter::arc("b", Behavior::Zones(1))],
            Duration::from_secs(30),
        )
        .with_page_concurrency(4);

        let started = tokio::time::Instant::now();
        let pages = coordinator.detect_document(&long_document(12)).await;

        // One wave of concurrent timeouts, then the adapter is skipped.
        assert!(started.elapsed() < Duration::from_secs(61));
        assert_eq!(pages.iter().map(|p| p.page).collect::<Vec<_>>(), (0..12).collect::<Vec<_>>());
        assert!(pages.iter().all(|p| p.zones.len() == 1 && !p.needs_review));
        let timeouts = pages.iter().filter(|p| p.failures[0].is_timeout()).count();
        assert_eq!(timeouts, 4);
        assert!(pages[11].failures[0].kind == AdapterErrorKind::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_adapter_stalling_flags_every_page() {
        let coordinator =
            DetectionCoordinator::new(vec![StubAdapter::arc("slow", Behavior::Stall)], Duration::from_secs(30));
        let pages = coordinator.detect_document(&long_document(5)).await;
        assert!(pages.iter().all(|p| p.needs_review && p.zones.is_empty()));
        assert!(pages[0].failures[0].is_timeout());
        assert!(pages[1..].iter().all(|p| p.failures[0].kind == AdapterErrorKind::Disabled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_calling_after_timeout_when_configured() {
        let coordinator =
            DetectionCoordinator::new(vec![StubAdapter::arc("slow", Behavior::Stall)], Duration::from_secs(1))
                .with_disable_after_timeout(false);
        let pages = coordinator.detect_document(&long_document(3)).await;
        assert!(pages.iter().all(|p| p.failures[0].is_timeout()));
    }

    #[tokio::test]
    async fn test_from_config_reads_concurrency() {
        let config = DetectionConfig {
            page_concurrency: 8,
            ..Default::default()
        };
        let coordinator = DetectionCoordinator::from_config(&config).unwrap();
        assert_eq!(coordinator.page_concurrency, 8);
        assert_eq!(coordinator.adapter_names(), vec!["text-structure"]);
    }

    #[tokio::test]
    async fn test_detect_document_in_page_order() {
        let coordinator =
            DetectionCoordinator::new(vec![StubAdapter::arc("a", Behavior::Zones(1))], Duration::from_secs(5));
        let document = DocumentInput::new("doc")
            .with_page(PageInput::new(0))
            .with_page(PageInput::new(1));
        let pages = coordinator.detect_document(&document).await;
        assert_eq!(pages.iter().map(|p| p.page).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(coordinator.adapter_names(), vec!["a"]);
    }
}
