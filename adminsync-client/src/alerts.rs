//! In-memory feed of recent system alerts fed by push events.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use adminsync_core::events::{ALERT_NEW, ALERT_UPDATE};
use adminsync_core::{Alert, Frame};

use crate::realtime::{ListenerId, SharedListeners};

/// Alerts kept, newest first.
pub const ALERT_FEED_CAPACITY: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct AlertFeed {
    alerts: Arc<Mutex<VecDeque<Alert>>>,
}

impl AlertFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register for `alert:new` and `alert:update` on `listeners`.
    pub fn attach(&self, listeners: &SharedListeners) -> [ListenerId; 2] {
        let feed = self.clone();
        let on_new = listeners.on(ALERT_NEW, move |frame: &Frame| {
            if let Some(alert) = decode(frame) {
                feed.push(alert);
            }
        });
        let feed = self.clone();
        let on_update = listeners.on(ALERT_UPDATE, move |frame: &Frame| {
            if let Some(alert) = decode(frame) {
                feed.update(alert);
            }
        });
        [on_new, on_update]
    }

    pub fn push(&self, alert: Alert) {
        let mut alerts = self.lock();
        alerts.push_front(alert);
        alerts.truncate(ALERT_FEED_CAPACITY);
    }

    /// Replace the alert with the same id. Alerts not in the feed are
    /// ignored.
    pub fn update(&self, alert: Alert) -> bool {
        let mut alerts = self.lock();
        match alerts.iter_mut().find(|existing| existing.id == alert.id) {
            Some(existing) => {
                *existing = alert;
                true
            }
            None => false,
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.lock().iter().cloned().collect()
    }

    pub fn unread_count(&self) -> usize {
        self.lock().iter().filter(|alert| alert.is_unread()).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Alert>> {
        match self.alerts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn decode(frame: &Frame) -> Option<Alert> {
    match serde_json::from_value::<Alert>(frame.data.clone()) {
        Ok(alert) => Some(alert),
        Err(err) => {
            tracing::warn!(event = %frame.event, error = %err, "Ignoring malformed alert");
            None
        }
    }
}
