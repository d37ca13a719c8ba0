//! Detector registry.

use std::sync::Arc;

use tracing::{debug, warn};

use super::aggregate::RecipientAggregate;
use super::detector::{CycleBoundary, EventDetector};
use super::events::EventName;
use crate::Result;

/// Ordered set of detectors, at most one per event kind.
#[derive(Default)]
pub struct DetectorRegistry {
    detectors: Vec<Arc<dyn EventDetector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `detector`, replacing any detector of the same event kind.
    pub fn register(&mut self, detector: Arc<dyn EventDetector>) {
        let event_name = detector.event_name();
        if let Some(existing) = self
            .detectors
            .iter_mut()
            .find(|d| d.event_name() == event_name)
        {
            warn!(event = %event_name, "Replacing existing detector");
            *existing = detector;
        } else {
            self.detectors.push(detector);
        }
    }

    /// Remove the detector for `event_name`. Returns whether one was registered.
    pub fn unregister(&mut self, event_name: EventName) -> bool {
        let before = self.detectors.len();
        self.detectors.retain(|d| d.event_name() != event_name);
        self.detectors.len() != before
    }

    pub fn event_names(&self) -> Vec<EventName> {
        self.detectors.iter().map(|d| d.event_name()).collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Run every detector in registration order and absorb the results.
    ///
    /// The first detector error is returned immediately. The caller owns
    /// `aggregate` and is expected to discard it in that case.
    pub async fn collect_into(
        &self,
        aggregate: &mut RecipientAggregate,
        boundary: CycleBoundary,
    ) -> Result<usize> {
        let mut total = 0;
        for detector in &self.detectors {
            let detected = detector.detect(boundary).await?;
            debug!(
                event = %detector.event_name(),
                count = detected.len(),
                "Detector finished"
            );
            total += detected.len();
            for notification in detected {
                aggregate.absorb_detected(notification);
            }
        }
        Ok(total)
    }
}
