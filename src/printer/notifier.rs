//! Delivers notifications to the observer, one at a time, in order.

use tokio::sync::mpsc;

use super::channel::NotifierMessage;
use crate::notify::NotificationSink;

/// Drain the queue until every sender is gone.
pub(crate) fn run(mut rx: mpsc::UnboundedReceiver<NotifierMessage>) {
    let mut observer: Option<Box<dyn NotificationSink>> = None;
    while let Some(message) = rx.blocking_recv() {
        match message {
            NotifierMessage::Deliver(notification) => match observer.as_mut() {
                Some(sink) => sink.deliver(notification),
                None => tracing::trace!("No observer, dropping {}", notification.method()),
            },
            NotifierMessage::SetObserver(sink) => observer = Some(sink),
            NotifierMessage::ClearObserver => observer = None,
        }
    }
    tracing::debug!("Notifier stopped");
}
