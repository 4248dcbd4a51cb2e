//! Observable state of a link's reconnect loop.

use std::fmt;

use tokio::sync::watch;

/// State of a monitor link's reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No stream and no attempt in progress.
    Idle,
    /// Opening a stream.
    Connecting,
    /// Stream open, downlinks are being delivered.
    Streaming,
    /// Waiting before the next open attempt.
    Backoff,
    /// Closed for good.
    Closed,
}

impl LinkState {
    /// Whether downlinks currently flow to the monitor.
    #[must_use]
    pub const fn is_streaming(self) -> bool {
        matches!(self, Self::Streaming)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Backoff => "backoff",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Holds a link's [`LinkState`] and notifies watchers of transitions.
///
/// `Closed` is terminal: once entered, later transitions are ignored, so a
/// reconnect loop winding down after `close` cannot report itself as live.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<LinkState>,
}

impl StateCell {
    pub(crate) fn new(initial: LinkState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub(crate) fn get(&self) -> LinkState {
        *self.tx.borrow()
    }

    /// Move to `next`. Returns `false` if nothing changed.
    pub(crate) fn set(&self, next: LinkState) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == next || *current == LinkState::Closed {
                return false;
            }
            *current = next;
            true
        })
    }

    pub(crate) fn watch(&self) -> watch::Receiver<LinkState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_is_terminal() {
        let cell = StateCell::new(LinkState::Idle);
        assert!(cell.set(LinkState::Connecting));
        assert!(!cell.set(LinkState::Connecting));
        assert!(cell.set(LinkState::Closed));

        assert!(!cell.set(LinkState::Backoff));
        assert_eq!(cell.get(), LinkState::Closed);
    }

    #[tokio::test]
    async fn test_watchers_see_transitions() {
        let cell = StateCell::new(LinkState::Idle);
        let mut rx = cell.watch();
        assert_eq!(*rx.borrow_and_update(), LinkState::Idle);

        cell.set(LinkState::Streaming);
        rx.changed().await.expect("sender alive");
        assert!(rx.borrow_and_update().is_streaming());

        cell.set(LinkState::Streaming);
        assert!(!rx.has_changed().expect("sender alive"));
    }

    #[test]
    fn test_display() {
        assert_eq!(LinkState::Backoff.to_string(), "backoff");
        assert_eq!(LinkState::Closed.to_string(), "closed");
    }
}
