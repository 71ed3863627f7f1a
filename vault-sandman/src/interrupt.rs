// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Cooperative cancellation.
//!
//! A termination signal must never interrupt a file decision half-way:
//! the handler only raises a flag, the sweeper finishes and commits the
//! in-flight decision before stopping, and the drainer stops between
//! files, leaving the queue intact.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{signal, SigHandler, Signal};
use tracing::warn;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn raise_flag(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install the SIGINT/SIGTERM handlers.
#[allow(unsafe_code)]
pub fn install() {
    // SAFETY: the handler only performs an atomic store, which is
    // async-signal-safe.
    unsafe {
        if let Err(e) = signal(Signal::SIGINT, SigHandler::Handler(raise_flag)) {
            warn!("Could not install SIGINT handler: {e}");
        }
        if let Err(e) = signal(Signal::SIGTERM, SigHandler::Handler(raise_flag)) {
            warn!("Could not install SIGTERM handler: {e}");
        }
    }
}

/// Whether a termination signal has been received.
pub fn pending() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_raises_once_signalled() {
        assert!(!pending());
        raise_flag(0);
        assert!(pending());
        INTERRUPTED.store(false, Ordering::SeqCst);
    }
}
