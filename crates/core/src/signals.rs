// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! One-slot mailbox carrying control requests from host threads to the run loop.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    Reset,
    Shutdown,
    Load { slot: u32 },
    Save { slot: u32 },
}

impl Signal {
    pub fn kind(self) -> SignalKind {
        match self {
            Signal::Reset => SignalKind::Reset,
            Signal::Shutdown => SignalKind::Shutdown,
            Signal::Load { .. } => SignalKind::Load,
            Signal::Save { .. } => SignalKind::Save,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Reset,
    Shutdown,
    Load,
    Save,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalKind::Reset => "reset",
            SignalKind::Shutdown => "shutdown",
            SignalKind::Load => "load",
            SignalKind::Save => "save",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unable to {requested} as {pending} is ongoing")]
pub struct SignalRejected {
    pub requested: SignalKind,
    pub pending: SignalKind,
}

#[derive(Debug, Default)]
pub struct SignalMailbox {
    pending: Mutex<Option<Signal>>,
}

impl SignalMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Signal>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Post `signal`. A pending signal of the same kind is replaced, so the
    /// latest slot wins; a pending signal of another kind rejects the request.
    pub fn send(&self, signal: Signal) -> Result<(), SignalRejected> {
        let mut slot = self.slot();
        match *slot {
            Some(pending) if pending.kind() != signal.kind() => Err(SignalRejected {
                requested: signal.kind(),
                pending: pending.kind(),
            }),
            _ => {
                *slot = Some(signal);
                Ok(())
            }
        }
    }

    /// Consume the pending signal.
    pub fn take(&self) -> Option<Signal> {
        self.slot().take()
    }

    pub fn pending(&self) -> Option<Signal> {
        *self.slot()
    }
}

/// Cloneable handle for posting signals from other threads.
#[derive(Debug, Clone)]
pub struct SignalSender(Arc<SignalMailbox>);

impl SignalSender {
    pub fn new(mailbox: Arc<SignalMailbox>) -> Self {
        Self(mailbox)
    }

    /// Returns false, after logging, when another kind of request is pending.
    pub fn send(&self, signal: Signal) -> bool {
        match self.0.send(signal) {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_kind_overwrites_slot() {
        let mailbox = SignalMailbox::new();
        mailbox.send(Signal::Save { slot: 1 }).unwrap();
        mailbox.send(Signal::Save { slot: 3 }).unwrap();
        assert_eq!(mailbox.take(), Some(Signal::Save { slot: 3 }));
        assert_eq!(mailbox.take(), None);
    }

    #[test]
    fn test_different_kind_rejected() {
        let mailbox = SignalMailbox::new();
        mailbox.send(Signal::Load { slot: 2 }).unwrap();
        let err = mailbox.send(Signal::Shutdown).unwrap_err();
        assert_eq!(err.to_string(), "unable to shutdown as load is ongoing");
        assert_eq!(mailbox.pending(), Some(Signal::Load { slot: 2 }));
    }

    #[test]
    fn test_send_after_take_succeeds() {
        let mailbox = SignalMailbox::new();
        mailbox.send(Signal::Reset).unwrap();
        mailbox.take();
        assert!(mailbox.send(Signal::Shutdown).is_ok());
    }

    #[test]
    fn test_sender_from_other_thread() {
        let mailbox = Arc::new(SignalMailbox::new());
        let sender = SignalSender::new(Arc::clone(&mailbox));
        let handle = std::thread::spawn(move || sender.send(Signal::Reset));
        assert!(handle.join().unwrap());
        assert_eq!(mailbox.take(), Some(Signal::Reset));
    }

    #[test]
    fn test_signal_json_form() {
        let json = serde_json::to_string(&Signal::Save { slot: 4 }).unwrap();
        assert_eq!(json, r#"{"kind":"save","slot":4}"#);
    }
}
