//! The downstream initialization gate.
//!
//! Every meta-tool handler waits on this gate before touching the fleet, so
//! the first tool call can never race the startup `connect_all`.

use tokio::sync::watch;

pub struct InitGate {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Default for InitGate {
    fn default() -> Self {
        Self::new()
    }
}

impl InitGate {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Open the gate. Idempotent.
    pub fn open(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_open(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the gate is open.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_blocks_until_open() {
        let gate = Arc::new(InitGate::new());
        assert!(!gate.is_open());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.wait().await;
                true
            })
        };

        // The waiter must not complete before the gate opens.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.open();
        assert!(waiter.await.unwrap());
        assert!(gate.is_open());

        // Waiting on an open gate returns immediately.
        gate.wait().await;

        // Opening twice is fine.
        gate.open();
    }
}
