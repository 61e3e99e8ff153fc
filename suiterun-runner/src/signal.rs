// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for handling interrupt signals.
//!
//! The orchestrator races its task loop against an interrupt source. On the
//! OS that source is Ctrl-C (plus SIGTERM/SIGHUP on Unix); in tests it is a
//! channel, so cancellation races are reproducible without real signals.

use crate::errors::SignalHandlerSetupError;
use std::time::Duration;
use tokio::{sync::mpsc::UnboundedReceiver, time::Instant};
use tracing::debug;

/// The kind of signal handling to set up for a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SignalHandlerKind {
    /// The standard signal handler. Captures interrupt and termination
    /// signals depending on the platform.
    Standard,

    /// A no-op signal handler. Useful for tests.
    Noop,
}

impl SignalHandlerKind {
    /// Builds the corresponding handler.
    pub fn build(self) -> Result<SignalHandler, SignalHandlerSetupError> {
        match self {
            Self::Standard => SignalHandler::new(),
            Self::Noop => Ok(SignalHandler::noop()),
        }
    }
}

/// An interrupt delivered by the handler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InterruptEvent;

/// The signal handler implementation.
#[derive(Debug)]
pub struct SignalHandler {
    source: SignalSource,
}

#[derive(Debug)]
enum SignalSource {
    #[cfg(any(unix, windows))]
    Os(imp::Signals),
    Channel(UnboundedReceiver<InterruptEvent>),
    Noop,
}

impl SignalHandler {
    /// Creates a new `SignalHandler` that handles Ctrl-C and other signals.
    #[cfg(any(unix, windows))]
    pub fn new() -> Result<Self, SignalHandlerSetupError> {
        let signals = imp::Signals::new()?;
        Ok(Self {
            source: SignalSource::Os(signals),
        })
    }

    /// Creates a handler that never delivers a signal.
    pub fn noop() -> Self {
        Self {
            source: SignalSource::Noop,
        }
    }

    /// Creates a handler fed from a channel. Used by tests to simulate
    /// signal delivery deterministically.
    pub fn from_channel(receiver: UnboundedReceiver<InterruptEvent>) -> Self {
        Self {
            source: SignalSource::Channel(receiver),
        }
    }

    /// Receives the next interrupt, or `None` if the source is exhausted.
    pub async fn recv(&mut self) -> Option<InterruptEvent> {
        match &mut self.source {
            #[cfg(any(unix, windows))]
            SignalSource::Os(signals) => signals.recv().await,
            SignalSource::Channel(receiver) => receiver.recv().await,
            SignalSource::Noop => None,
        }
    }
}

#[cfg(unix)]
mod imp {
    use super::*;
    use tokio::signal::unix::{Signal, SignalKind, signal};

    /// SIGINT, SIGTERM and SIGHUP on Unix.
    #[derive(Debug)]
    pub(super) struct Signals {
        sigint: SignalWithDone,
        sighup: SignalWithDone,
        sigterm: SignalWithDone,
    }

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            let sigint = SignalWithDone::new(SignalKind::interrupt())?;
            let sighup = SignalWithDone::new(SignalKind::hangup())?;
            let sigterm = SignalWithDone::new(SignalKind::terminate())?;
            Ok(Self {
                sigint,
                sighup,
                sigterm,
            })
        }

        pub(super) async fn recv(&mut self) -> Option<InterruptEvent> {
            loop {
                tokio::select! {
                    recv = self.sigint.signal.recv(), if !self.sigint.done => {
                        match recv {
                            Some(()) => break Some(InterruptEvent),
                            None => self.sigint.done = true,
                        }
                    }
                    recv = self.sighup.signal.recv(), if !self.sighup.done => {
                        match recv {
                            Some(()) => break Some(InterruptEvent),
                            None => self.sighup.done = true,
                        }
                    }
                    recv = self.sigterm.signal.recv(), if !self.sigterm.done => {
                        match recv {
                            Some(()) => break Some(InterruptEvent),
                            None => self.sigterm.done = true,
                        }
                    }
                    else => {
                        break None
                    }
                }
            }
        }
    }

    #[derive(Debug)]
    struct SignalWithDone {
        signal: Signal,
        done: bool,
    }

    impl SignalWithDone {
        fn new(kind: SignalKind) -> std::io::Result<Self> {
            let signal = signal(kind)?;
            Ok(Self {
                signal,
                done: false,
            })
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use tokio::signal::windows::{CtrlC, ctrl_c};

    #[derive(Debug)]
    pub(super) struct Signals {
        ctrl_c: CtrlC,
        ctrl_c_done: bool,
    }

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            let ctrl_c = ctrl_c()?;
            Ok(Self {
                ctrl_c,
                ctrl_c_done: false,
            })
        }

        pub(super) async fn recv(&mut self) -> Option<InterruptEvent> {
            if self.ctrl_c_done {
                return None;
            }

            match self.ctrl_c.recv().await {
                Some(()) => Some(InterruptEvent),
                None => {
                    self.ctrl_c_done = true;
                    None
                }
            }
        }
    }
}

/// The default debounce window for duplicate signal delivery.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Debounces duplicate interrupt delivery.
///
/// Terminals commonly deliver the same interrupt to every process in the
/// foreground group, sometimes more than once in quick succession. A second
/// interrupt within the window is ignored; once the window passes the
/// handler is re-armed. Time is read from the tokio clock, so tests can
/// drive this with a paused clock instead of real timers.
#[derive(Debug)]
pub struct DebouncedInterrupts {
    handler: SignalHandler,
    window: Duration,
    last_delivery: Option<Instant>,
}

impl DebouncedInterrupts {
    /// Wraps a handler with the default debounce window.
    pub fn new(handler: SignalHandler) -> Self {
        Self::with_window(handler, DEFAULT_DEBOUNCE_WINDOW)
    }

    /// Wraps a handler with an explicit debounce window.
    pub fn with_window(handler: SignalHandler, window: Duration) -> Self {
        Self {
            handler,
            window,
            last_delivery: None,
        }
    }

    /// Receives the next non-duplicate interrupt, or `None` if the
    /// underlying source is exhausted.
    pub async fn recv(&mut self) -> Option<InterruptEvent> {
        loop {
            let event = self.handler.recv().await?;
            let now = Instant::now();
            if let Some(last) = self.last_delivery
                && now.duration_since(last) < self.window
            {
                debug!("ignoring duplicate interrupt within debounce window");
                continue;
            }
            self.last_delivery = Some(now);
            return Some(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test(start_paused = true)]
    async fn duplicate_interrupts_are_debounced_then_rearmed() {
        let (tx, rx) = unbounded_channel();
        let mut interrupts = DebouncedInterrupts::with_window(
            SignalHandler::from_channel(rx),
            Duration::from_millis(500),
        );

        tx.send(InterruptEvent).unwrap();
        assert_eq!(interrupts.recv().await, Some(InterruptEvent));

        // A duplicate within the window is swallowed; after dropping the
        // sender the source is exhausted and recv returns None.
        tx.send(InterruptEvent).unwrap();
        drop(tx);
        assert_eq!(interrupts.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupts_after_window_are_delivered() {
        let (tx, rx) = unbounded_channel();
        let mut interrupts = DebouncedInterrupts::with_window(
            SignalHandler::from_channel(rx),
            Duration::from_millis(500),
        );

        tx.send(InterruptEvent).unwrap();
        assert_eq!(interrupts.recv().await, Some(InterruptEvent));

        tokio::time::advance(Duration::from_millis(600)).await;
        tx.send(InterruptEvent).unwrap();
        assert_eq!(interrupts.recv().await, Some(InterruptEvent));
    }

    #[tokio::test]
    async fn noop_handler_never_delivers() {
        let mut interrupts = DebouncedInterrupts::new(SignalHandler::noop());
        assert_eq!(interrupts.recv().await, None);
    }
}
