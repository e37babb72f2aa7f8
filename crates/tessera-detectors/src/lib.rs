//! tessera-detectors - Detector adapters for tessera.
//!
//! Provides the built-in adapters and the coordinator that fans a page out
//! to a fixed adapter list.
//!
//! - [`TextStructureAdapter`] - text blocks and equation-number labels from
//!   the page text layer
//! - [`PrecomputedAdapter`] - detections written by an out-of-process model
//!
//! # Example
//!
//! ```ignore
//! use tessera_detectors::DetectionCoordinator;
//!
//! let coordinator = DetectionCoordinator::from_config(&config.detection)?;
//! let detections = coordinator.detect_page(&page).await;
//! ```

mod coordinator;
mod factory;
mod precomputed;
mod text_structure;

pub use coordinator::{DetectionCoordinator, PageDetections};
pub use factory::DetectorFactory;
pub use precomputed::{normalize_class, PrecomputedAdapter};
pub use text_structure::{TextStructureAdapter, LABEL_NUMBER, TEXT_BLOCK};
