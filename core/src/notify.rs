//! Outbound notification seam.
//!
//! Delivery is fire-and-forget and sits outside the transaction boundary:
//! the engine notifies only after commit, and a failing notifier is logged,
//! never propagated.

use crate::event::LoyaltyEvent;
use std::sync::Mutex;

pub trait Notifier: Send + Sync {
    fn notify(&self, event: &LoyaltyEvent) -> anyhow::Result<()>;
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: &LoyaltyEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes each event to the `log` facade at info level.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &LoyaltyEvent) -> anyhow::Result<()> {
        log::info!("notify {}: {}", event.type_name(), serde_json::to_string(event)?);
        Ok(())
    }
}

/// Keeps delivered events in memory for inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<LoyaltyEvent>>,
}

impl RecordingNotifier {
    pub fn take(&self) -> Vec<LoyaltyEvent> {
        match self.events.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &LoyaltyEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("recording notifier poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

impl<N: Notifier + ?Sized> Notifier for std::sync::Arc<N> {
    fn notify(&self, event: &LoyaltyEvent) -> anyhow::Result<()> {
        (**self).notify(event)
    }
}
