// SPDX-License-Identifier: GPL-3.0-only

//! Monitor notifications and filtered subscriptions

use futures::Stream;
use storage_types::{VolumeEvent, VolumeEventKind};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Everything a [`crate::VolumeMonitor`] broadcasts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// One detected change
    Volume(VolumeEvent),

    /// Sent after a batch of one or more volume events
    Changed,

    /// Sent after every completed pass, including passes without changes
    RefreshCompleted,
}

/// Selects which [`MonitorEvent`]s a subscription yields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    Mounted,
    Unmounted,
    Renamed,
    /// Every volume event
    Any,
    Changed,
    RefreshCompleted,
    /// Every notification, volume events included
    All,
}

impl EventFilter {
    pub fn matches(self, event: &MonitorEvent) -> bool {
        match (self, event) {
            (EventFilter::All, _) => true,
            (EventFilter::Any, MonitorEvent::Volume(_)) => true,
            (EventFilter::Mounted, MonitorEvent::Volume(e)) => e.kind() == VolumeEventKind::Mounted,
            (EventFilter::Unmounted, MonitorEvent::Volume(e)) => {
                e.kind() == VolumeEventKind::Unmounted
            }
            (EventFilter::Renamed, MonitorEvent::Volume(e)) => e.kind() == VolumeEventKind::Renamed,
            (EventFilter::Changed, MonitorEvent::Changed) => true,
            (EventFilter::RefreshCompleted, MonitorEvent::RefreshCompleted) => true,
            _ => false,
        }
    }
}

/// A filtered view of the monitor's broadcast channel.
///
/// Only sees notifications sent after it was created. A subscriber that
/// falls too far behind skips the oldest notifications and keeps going.
pub struct EventSubscription {
    receiver: broadcast::Receiver<MonitorEvent>,
    filter: EventFilter,
}

impl EventSubscription {
    pub(crate) fn new(receiver: broadcast::Receiver<MonitorEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    pub fn filter(&self) -> EventFilter {
        self.filter
    }

    /// Next matching notification, or `None` once the monitor is gone.
    pub async fn recv(&mut self) -> Option<MonitorEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Volume event subscriber lagged, {skipped} notifications dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = MonitorEvent> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|event| (event, subscription))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use storage_types::{Mountpoint, Volume};

    use super::*;

    fn mounted() -> MonitorEvent {
        let path = PathBuf::from("/media/usb");
        MonitorEvent::Volume(VolumeEvent::Mounted {
            volume: Volume {
                identity: "u1".to_string(),
                device: "/dev/sdb1".to_string(),
                serial: String::new(),
                label: "USB".to_string(),
                filesystem_type: "vfat".to_string(),
                mountpoints: vec![Mountpoint {
                    path: path.clone(),
                    label: "USB".to_string(),
                }],
                mount_path: path,
                protocol: "usb".to_string(),
                removable: true,
                size: 1,
            },
        })
    }

    #[test]
    fn filters_select_their_notifications() {
        let event = mounted();
        assert!(EventFilter::Mounted.matches(&event));
        assert!(EventFilter::Any.matches(&event));
        assert!(EventFilter::All.matches(&event));
        assert!(!EventFilter::Unmounted.matches(&event));
        assert!(!EventFilter::Changed.matches(&event));

        assert!(EventFilter::Changed.matches(&MonitorEvent::Changed));
        assert!(!EventFilter::Any.matches(&MonitorEvent::Changed));
        assert!(EventFilter::RefreshCompleted.matches(&MonitorEvent::RefreshCompleted));
        assert!(EventFilter::All.matches(&MonitorEvent::RefreshCompleted));
    }

    #[tokio::test]
    async fn subscription_skips_unmatched_and_ends_on_close() {
        let (sender, receiver) = broadcast::channel(8);
        let mut subscription = EventSubscription::new(receiver, EventFilter::RefreshCompleted);

        sender.send(mounted()).unwrap();
        sender.send(MonitorEvent::Changed).unwrap();
        sender.send(MonitorEvent::RefreshCompleted).unwrap();
        drop(sender);

        assert_eq!(subscription.recv().await, Some(MonitorEvent::RefreshCompleted));
        assert_eq!(subscription.recv().await, None);
    }
}
