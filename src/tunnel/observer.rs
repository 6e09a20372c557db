use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// The observable fields of a [`Tunnel`](crate::tunnel::Tunnel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum TunnelField {
    Config,
    State,
    Statistics,
}

impl TunnelField {
    pub fn all() -> impl Iterator<Item = Self> {
        use strum::IntoEnumIterator;
        Self::iter()
    }
}

impl fmt::Display for TunnelField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelField::Config => write!(f, "config"),
            TunnelField::State => write!(f, "state"),
            TunnelField::Statistics => write!(f, "statistics"),
        }
    }
}

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Handle for one registered subscriber. Pass back to
/// [`Tunnel::unsubscribe`](crate::tunnel::Tunnel::unsubscribe) to stop
/// delivery; dropping the handle leaves the subscription registered.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    field: TunnelField,
}

struct SubscriberEntry {
    id: u64,
    field: TunnelField,
    callback: Callback,
}

/// Per-record subscriber registry.
///
/// Notifications are delivered synchronously on whichever task updated the
/// field, always after the new value has been stored. The subscriber list is
/// snapshotted before invocation, so a callback may subscribe or unsubscribe
/// without deadlocking.
#[derive(Default)]
pub(crate) struct ChangeNotifier {
    subscribers: Mutex<Vec<SubscriberEntry>>,
    next_id: AtomicU64,
}

impl ChangeNotifier {
    pub(crate) fn subscribe<F>(&self, field: TunnelField, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().unwrap().push(SubscriberEntry {
            id,
            field,
            callback: Arc::new(callback),
        });
        Subscription { id, field }
    }

    pub(crate) fn unsubscribe(&self, subscription: Subscription) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|entry| entry.field != subscription.field || entry.id != subscription.id);
    }

    /// Async bridge: a zero-payload signal per change of `field`. The
    /// underlying subscription lives as long as the record; signals sent after
    /// the receiver is dropped are discarded.
    pub(crate) fn watch(&self, field: TunnelField) -> mpsc::UnboundedReceiver<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(field, move || {
            let _ = tx.send(());
        });
        rx
    }

    pub(crate) fn notify(&self, field: TunnelField) {
        let callbacks: Vec<Callback> = {
            let subscribers = self.subscribers.lock().unwrap();
            subscribers
                .iter()
                .filter(|entry| entry.field == field)
                .map(|entry| Arc::clone(&entry.callback))
                .collect()
        };
        for callback in callbacks {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn notifies_only_matching_field() {
        let notifier = ChangeNotifier::default();
        let config_hits = Arc::new(AtomicUsize::new(0));
        let state_hits = Arc::new(AtomicUsize::new(0));

        let hits = Arc::clone(&config_hits);
        notifier.subscribe(TunnelField::Config, move || {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        let hits = Arc::clone(&state_hits);
        notifier.subscribe(TunnelField::State, move || {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        notifier.notify(TunnelField::Config);
        notifier.notify(TunnelField::Config);

        assert_eq!(config_hits.load(Ordering::SeqCst), 2);
        assert_eq!(state_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let notifier = ChangeNotifier::default();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let subscription = notifier.subscribe(TunnelField::Statistics, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        notifier.notify(TunnelField::Statistics);
        notifier.unsubscribe(subscription);
        notifier.notify(TunnelField::Statistics);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn watch_receives_one_signal_per_change() {
        let notifier = ChangeNotifier::default();
        let mut rx = notifier.watch(TunnelField::State);

        notifier.notify(TunnelField::State);
        notifier.notify(TunnelField::State);
        notifier.notify(TunnelField::Config);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn all_lists_every_field() {
        let fields: Vec<TunnelField> = TunnelField::all().collect();
        assert_eq!(
            fields,
            vec![
                TunnelField::Config,
                TunnelField::State,
                TunnelField::Statistics
            ]
        );
    }
}
