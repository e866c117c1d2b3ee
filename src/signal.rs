use std::sync::OnceLock;

use tokio::sync::watch;

/// Create a connected signal pair.
pub fn signal() -> (SignalSource, Signal) {
    let (tx, rx) = watch::channel(false);
    (SignalSource { tx }, Signal { rx })
}

/// Firing side of a single-fire broadcast signal.
///
/// Used for interruptors, connection drains, and the manager drain. Pulsing
/// is idempotent. A source dropped without pulsing never wakes its waiters,
/// so owners of a drain source must pulse before dropping it.
pub struct SignalSource {
    tx: watch::Sender<bool>,
}

impl SignalSource {
    /// Fire the signal. All current and future waiters observe it.
    pub fn pulse(&self) {
        // send_replace works with zero receivers; plain send would error
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> Signal {
        Signal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Waiting side of a single-fire broadcast signal. Cheap to clone; every
/// clone observes the same pulse.
#[derive(Clone)]
pub struct Signal {
    rx: watch::Receiver<bool>,
}

impl Signal {
    /// A signal that never fires. Null interruptor for internal waits.
    pub fn never() -> Signal {
        static NEVER: OnceLock<SignalSource> = OnceLock::new();
        NEVER.get_or_init(|| signal().0).subscribe()
    }

    pub fn is_fired(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal has fired. If the source was dropped without
    /// firing, pend forever; callers always race this against completion.
    pub async fn fired(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("fired", &self.is_fired())
            .finish()
    }
}
