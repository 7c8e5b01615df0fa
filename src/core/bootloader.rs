//! Bootloader entry
//!
//! Drives a keyboard into its bootloader and waits for the bootloader
//! device to show up:
//!
//! ```text
//! Idle -> TriggerSent -> WaitingForDevice -> Ready | TimedOut
//! ```
//!
//! Only RP2040 boards can be rebooted over HID. AVR and ARM boards need the
//! user to press reset, so sequencing reports back immediately and asks for
//! manual action. A timeout is not an error: the device may well be ready
//! even if detection missed it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::device::DeviceClient;
use super::features::McuFamily;
use super::protocol::Transport;
use crate::config::defaults::{BOOTLOADER_POLL_INTERVAL, BOOTLOADER_WAIT_TIMEOUT};
use crate::error::SequencerError;

/// Sequencer states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    /// Nothing sent yet
    Idle,
    /// Bootloader command delivered (or attempted)
    TriggerSent,
    /// Polling for the bootloader device
    WaitingForDevice,
    /// Bootloader device is present, or no detection is possible
    Ready,
    /// Gave up waiting
    TimedOut,
    /// Wait aborted by the cancel flag
    Interrupted,
}

/// What the caller gets back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SequenceOutcome {
    /// Ready to deploy; the user may still need to reset the board by hand
    Ready {
        /// No automated entry or detection happened
        manual_action_required: bool,
    },
    /// Detection never saw the device
    TimedOut {
        /// How long we polled
        #[serde(serialize_with = "serialize_secs")]
        waited: Duration,
    },
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Polling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Give up after this long
    pub timeout: Duration,
    /// Time between polls
    pub poll_interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: BOOTLOADER_WAIT_TIMEOUT,
            poll_interval: BOOTLOADER_POLL_INTERVAL,
        }
    }
}

/// Detects whether the bootloader device has appeared
pub trait PresenceProbe {
    /// One poll
    fn is_present(&mut self) -> bool;
}

impl<F: FnMut() -> bool> PresenceProbe for F {
    fn is_present(&mut self) -> bool {
        self()
    }
}

/// Something that can put the keyboard into its bootloader
pub trait BootloaderEntry {
    /// Enter the bootloader for `family` and report readiness
    fn enter(&mut self, family: McuFamily) -> Result<SequenceOutcome, SequencerError>;
}

/// Observer for progress display while waiting
pub trait WaitObserver {
    /// Polling is about to start
    fn wait_started(&mut self, _timeout: Duration) {}

    /// One negative poll
    fn polled(&mut self, _elapsed: Duration) {}

    /// Polling finished
    fn wait_finished(&mut self, _outcome: &SequenceOutcome) {}

    /// Polling was cancelled
    fn wait_interrupted(&mut self) {}
}

/// Observer that ignores everything
#[derive(Debug, Default)]
pub struct NoopObserver;

impl WaitObserver for NoopObserver {}

/// Bootloader sequencer for one flash operation
pub struct BootloaderSequencer<'a, T: Transport, P: PresenceProbe, O: WaitObserver = NoopObserver> {
    transport: &'a T,
    request_timeout: Duration,
    probe: Option<P>,
    policy: WaitPolicy,
    cancel: Option<Arc<AtomicBool>>,
    observer: O,
    state: WaitState,
}

impl<'a, T: Transport, P: PresenceProbe> BootloaderSequencer<'a, T, P, NoopObserver> {
    /// Create a sequencer. `probe` is `None` when the host has no way to
    /// detect the bootloader device.
    pub fn new(transport: &'a T, request_timeout: Duration, probe: Option<P>) -> Self {
        Self {
            transport,
            request_timeout,
            probe,
            policy: WaitPolicy::default(),
            cancel: None,
            observer: NoopObserver,
            state: WaitState::Idle,
        }
    }
}

impl<'a, T: Transport, P: PresenceProbe, O: WaitObserver> BootloaderSequencer<'a, T, P, O> {
    /// Override the polling policy
    #[must_use]
    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Abort the wait once `flag` is set
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Report wait progress to `observer`
    pub fn with_observer<O2: WaitObserver>(
        self,
        observer: O2,
    ) -> BootloaderSequencer<'a, T, P, O2> {
        BootloaderSequencer {
            transport: self.transport,
            request_timeout: self.request_timeout,
            probe: self.probe,
            policy: self.policy,
            cancel: self.cancel,
            observer,
            state: self.state,
        }
    }

    /// Current state
    pub fn state(&self) -> WaitState {
        self.state
    }

    /// Run the sequence for `family`
    pub fn run(&mut self, family: McuFamily) -> Result<SequenceOutcome, SequencerError> {
        self.state = WaitState::Idle;
        match family {
            McuFamily::Rp2040 => self.run_rp2040(),
            McuFamily::Avr | McuFamily::Arm => {
                tracing::warn!(
                    "{} bootloader entry is not automated, please enter bootloader mode manually",
                    family
                );
                Ok(self.finish(SequenceOutcome::Ready {
                    manual_action_required: true,
                }))
            }
            McuFamily::Unknown => {
                tracing::warn!("Unknown MCU family, skipping bootloader entry");
                Ok(self.finish(SequenceOutcome::Ready {
                    manual_action_required: false,
                }))
            }
        }
    }

    fn run_rp2040(&mut self) -> Result<SequenceOutcome, SequencerError> {
        let delivered = self.send_trigger();
        self.transition(WaitState::TriggerSent);

        if !delivered {
            tracing::warn!(
                "HID bootloader entry not available. Please enter bootloader mode manually: \
                 hold BOOT, press and release RESET, then release BOOT"
            );
        }

        match self.probe.take() {
            Some(mut probe) => {
                let outcome = self.wait_for_device(&mut probe);
                self.probe = Some(probe);
                match outcome {
                    Ok(outcome) => Ok(self.finish(outcome)),
                    Err(err) => {
                        self.transition(WaitState::Interrupted);
                        self.observer.wait_interrupted();
                        Err(err)
                    }
                }
            }
            None => {
                tracing::warn!(
                    "Bootloader detection unavailable on this host, assuming device is ready"
                );
                Ok(self.finish(SequenceOutcome::Ready {
                    manual_action_required: true,
                }))
            }
        }
    }

    /// Fire the `BOOTLOADER` command. Returns whether the device acknowledged
    /// it, either by answering or by disconnecting.
    fn send_trigger(&self) -> bool {
        let session = match self.transport.open() {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!("Could not connect to keyboard via HID: {}", err);
                return false;
            }
        };

        match DeviceClient::new(session, self.request_timeout).trigger_bootloader() {
            Ok(response) if response.success() => {
                tracing::info!("HID bootloader command sent");
                true
            }
            Ok(response) => {
                tracing::warn!("Bootloader command failed: {}", response.message);
                false
            }
            Err(err) => {
                tracing::warn!("Bootloader command failed: {}", err);
                false
            }
        }
    }

    fn wait_for_device(&mut self, probe: &mut P) -> Result<SequenceOutcome, SequencerError> {
        self.transition(WaitState::WaitingForDevice);
        self.observer.wait_started(self.policy.timeout);
        tracing::info!(
            "Waiting for bootloader device (timeout: {}s)",
            self.policy.timeout.as_secs_f64()
        );

        let started = Instant::now();
        let deadline = started + self.policy.timeout;

        loop {
            self.check_cancelled()?;

            if probe.is_present() {
                tracing::info!("Bootloader device detected");
                return Ok(SequenceOutcome::Ready {
                    manual_action_required: false,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                let waited = now - started;
                tracing::warn!(
                    "Timed out waiting for bootloader device after {:.1}s",
                    waited.as_secs_f64()
                );
                return Ok(SequenceOutcome::TimedOut { waited });
            }

            self.observer.polled(now - started);
            std::thread::sleep(self.policy.poll_interval.min(deadline - now));
        }
    }

    fn check_cancelled(&self) -> Result<(), SequencerError> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(SequencerError::Interrupted),
            _ => Ok(()),
        }
    }

    fn finish(&mut self, outcome: SequenceOutcome) -> SequenceOutcome {
        let state = match outcome {
            SequenceOutcome::Ready { .. } => WaitState::Ready,
            SequenceOutcome::TimedOut { .. } => WaitState::TimedOut,
        };
        self.transition(state);
        self.observer.wait_finished(&outcome);
        outcome
    }

    fn transition(&mut self, next: WaitState) {
        tracing::debug!("Bootloader sequencer: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

impl<T, P, O> BootloaderEntry for BootloaderSequencer<'_, T, P, O>
where
    T: Transport,
    P: PresenceProbe,
    O: WaitObserver,
{
    fn enter(&mut self, family: McuFamily) -> Result<SequenceOutcome, SequencerError> {
        self.run(family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{Command, StatusCode};
    use crate::test_utils::mock::{MockDevice, MockTransport, Reply};

    const REQUEST_TIMEOUT: Duration = Duration::from_millis(200);

    fn fast_policy(timeout_ms: u64) -> WaitPolicy {
        WaitPolicy {
            timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(10),
        }
    }

    type Probe = Box<dyn FnMut() -> bool>;

    fn never() -> Option<Probe> {
        Some(Box::new(|| false))
    }

    #[test]
    fn test_default_policy() {
        let policy = WaitPolicy::default();
        assert_eq!(policy.timeout, Duration::from_secs(30));
        assert_eq!(policy.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_rp2040_sends_trigger_and_becomes_ready() {
        let transport = MockTransport::new(MockDevice::field_kit("left"));
        let mut polls = 0;
        let probe = move || {
            polls += 1;
            polls >= 3
        };
        let mut sequencer = BootloaderSequencer::new(&transport, REQUEST_TIMEOUT, Some(probe))
            .with_policy(fast_policy(1_000));

        let outcome = sequencer.run(McuFamily::Rp2040).unwrap();

        assert_eq!(
            outcome,
            SequenceOutcome::Ready {
                manual_action_required: false
            }
        );
        assert_eq!(sequencer.state(), WaitState::Ready);
        assert_eq!(transport.sent_commands(), vec!["BOOTLOADER".to_string()]);
        assert_eq!(transport.opens(), transport.closes());
    }

    #[test]
    fn test_ready_not_before_device_appears() {
        let transport = MockTransport::new(MockDevice::field_kit("left"));
        let appears_after = Duration::from_millis(60);
        let started = Instant::now();
        let probe = move || started.elapsed() >= appears_after;
        let mut sequencer = BootloaderSequencer::new(&transport, REQUEST_TIMEOUT, Some(probe))
            .with_policy(fast_policy(1_000));

        let outcome = sequencer.run(McuFamily::Rp2040).unwrap();

        assert!(matches!(outcome, SequenceOutcome::Ready { .. }));
        assert!(started.elapsed() >= appears_after);
    }

    #[test]
    fn test_times_out_at_boundary() {
        let transport = MockTransport::new(MockDevice::field_kit("left"));
        let timeout = Duration::from_millis(120);
        let mut sequencer = BootloaderSequencer::new(&transport, REQUEST_TIMEOUT, never())
            .with_policy(WaitPolicy {
                timeout,
                poll_interval: Duration::from_millis(50),
            });

        let outcome = sequencer.run(McuFamily::Rp2040).unwrap();

        match outcome {
            SequenceOutcome::TimedOut { waited } => {
                assert!(waited >= timeout, "returned early after {waited:?}");
                assert!(waited < timeout + Duration::from_millis(500));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(sequencer.state(), WaitState::TimedOut);
    }

    #[test]
    fn test_waits_even_when_trigger_fails() {
        let transport = MockTransport::unplugged();
        let mut sequencer = BootloaderSequencer::new(&transport, REQUEST_TIMEOUT, Some(|| true))
            .with_policy(fast_policy(500));

        let outcome = sequencer.run(McuFamily::Rp2040).unwrap();

        assert_eq!(
            outcome,
            SequenceOutcome::Ready {
                manual_action_required: false
            }
        );
    }

    #[test]
    fn test_rp2040_without_probe_needs_manual_check() {
        let transport = MockTransport::new(MockDevice::field_kit("left"));
        let mut sequencer = BootloaderSequencer::new(&transport, REQUEST_TIMEOUT, None::<Probe>);

        let outcome = sequencer.run(McuFamily::Rp2040).unwrap();

        assert_eq!(
            outcome,
            SequenceOutcome::Ready {
                manual_action_required: true
            }
        );
        assert_eq!(transport.sent_commands(), vec!["BOOTLOADER".to_string()]);
    }

    #[test]
    fn test_avr_and_arm_require_manual_action() {
        for family in [McuFamily::Avr, McuFamily::Arm] {
            let transport = MockTransport::new(MockDevice::field_kit("left"));
            let mut sequencer = BootloaderSequencer::new(&transport, REQUEST_TIMEOUT, never());
            let outcome = sequencer.run(family).unwrap();
            assert_eq!(
                outcome,
                SequenceOutcome::Ready {
                    manual_action_required: true
                }
            );
            assert_eq!(transport.opens(), 0);
        }
    }

    #[test]
    fn test_unknown_family_is_noop() {
        let transport = MockTransport::new(MockDevice::field_kit("left"));
        let mut sequencer = BootloaderSequencer::new(&transport, REQUEST_TIMEOUT, never());
        let outcome = sequencer.run(McuFamily::Unknown).unwrap();
        assert_eq!(
            outcome,
            SequenceOutcome::Ready {
                manual_action_required: false
            }
        );
        assert_eq!(transport.opens(), 0);
        assert_eq!(sequencer.state(), WaitState::Ready);
    }

    #[test]
    fn test_interrupt_aborts_wait() {
        let transport = MockTransport::new(MockDevice::field_kit("left"));
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);
        let mut polls = 0;
        let probe = move || {
            polls += 1;
            if polls == 2 {
                setter.store(true, Ordering::Relaxed);
            }
            false
        };
        let mut sequencer = BootloaderSequencer::new(&transport, REQUEST_TIMEOUT, Some(probe))
            .with_policy(fast_policy(5_000))
            .with_cancel_flag(flag);

        let err = sequencer.run(McuFamily::Rp2040).unwrap_err();
        assert_eq!(err, SequencerError::Interrupted);
        assert_eq!(sequencer.state(), WaitState::Interrupted);
    }

    #[test]
    fn test_error_reply_to_trigger_still_waits() {
        let device = MockDevice::field_kit("left").reply(
            Command::Bootloader,
            Reply::Frame(StatusCode::Error, "Bootloader disabled".to_string()),
        );
        let transport = MockTransport::new(device);
        let mut polls = 0;
        let probe = move || {
            polls += 1;
            polls > 1
        };
        let mut sequencer = BootloaderSequencer::new(&transport, REQUEST_TIMEOUT, Some(probe))
            .with_policy(fast_policy(1_000));

        let outcome = sequencer.run(McuFamily::Rp2040).unwrap();

        assert_eq!(
            outcome,
            SequenceOutcome::Ready {
                manual_action_required: false
            }
        );
        assert_eq!(transport.sent_commands(), vec!["BOOTLOADER"]);
        assert_eq!(transport.opens(), transport.closes());
    }

    #[derive(Default)]
    struct CountingObserver {
        started: usize,
        polls: usize,
        finished: usize,
        interrupted: usize,
    }

    impl WaitObserver for &mut CountingObserver {
        fn wait_started(&mut self, _timeout: Duration) {
            self.started += 1;
        }

        fn polled(&mut self, _elapsed: Duration) {
            self.polls += 1;
        }

        fn wait_finished(&mut self, _outcome: &SequenceOutcome) {
            self.finished += 1;
        }

        fn wait_interrupted(&mut self) {
            self.interrupted += 1;
        }
    }

    #[test]
    fn test_observer_sees_wait() {
        let transport = MockTransport::new(MockDevice::field_kit("left"));
        let mut observer = CountingObserver::default();
        let mut polls = 0;
        let probe = move || {
            polls += 1;
            polls > 2
        };
        let mut sequencer = BootloaderSequencer::new(&transport, REQUEST_TIMEOUT, Some(probe))
            .with_policy(fast_policy(1_000))
            .with_observer(&mut observer);
        sequencer.run(McuFamily::Rp2040).unwrap();
        drop(sequencer);

        assert_eq!(observer.started, 1);
        assert_eq!(observer.polls, 2);
        assert_eq!(observer.finished, 1);
        assert_eq!(observer.interrupted, 0);
    }

    #[test]
    fn test_observer_told_about_interrupt() {
        let transport = MockTransport::new(MockDevice::field_kit("left"));
        let mut observer = CountingObserver::default();
        let flag = Arc::new(AtomicBool::new(true));
        let mut sequencer = BootloaderSequencer::new(&transport, REQUEST_TIMEOUT, never())
            .with_policy(fast_policy(1_000))
            .with_cancel_flag(flag)
            .with_observer(&mut observer);
        assert!(sequencer.run(McuFamily::Rp2040).is_err());
        drop(sequencer);

        assert_eq!(observer.started, 1);
        assert_eq!(observer.finished, 0);
        assert_eq!(observer.interrupted, 1);
    }
}
