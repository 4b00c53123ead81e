//! Signal-driven shutdown tests
//!
//! These deliver real signals to the test process, so they run serially.
//! The signal listener is built on the test thread before any signal is
//! sent, and every worker blocks termination signals itself, so the
//! listener's handler is what receives them.

use anyhow::Result;
use serial_test::serial;
use std::thread;
use std::time::Duration;

use wlswarm::backend::headless::HeadlessDisplay;
use wlswarm::{harness, HarnessConfig, StopListener, StopReason, WindowId, WindowState};

fn send_to_self(signal: libc::c_int) {
    // SAFETY: plain kill(2) on our own pid
    let rc = unsafe { libc::kill(libc::getpid(), signal) };
    assert_eq!(rc, 0);
}

fn config(threads: usize) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.general.threads = threads;
    config.dispatch.timeout_ms = 10;
    config
}

#[test]
#[serial]
fn test_sigterm_stops_all_windows() -> Result<()> {
    let display = HeadlessDisplay::new();
    let _pump = display.start_pump(Duration::from_millis(1), Vec::new())?;
    let (mut listener, _handle) = StopListener::with_signals()?;
    assert!(listener.watches_signals());

    let sender = {
        let display = display.clone();
        thread::spawn(move || {
            // Every window has rendered after at least one event batch
            while !(0..5).all(|i| display.frames_presented(WindowId(i)) > 1) {
                thread::sleep(Duration::from_millis(5));
            }
            send_to_self(libc::SIGTERM);
        })
    };

    let summary = harness::launch(&config(5), || display.connect(), &mut listener)?;
    sender.join().unwrap();

    assert_eq!(summary.stop_reason, StopReason::Terminate);
    assert_eq!(summary.windows(), 5);
    for report in &summary.reports {
        assert!(report.dispatches > 0);
        assert!(report.history.contains(&WindowState::Releasing));
        assert_eq!(report.final_state, WindowState::Terminated);
    }
    assert!(display.is_terminated());
    Ok(())
}

#[test]
#[serial]
fn test_sigint_stops_and_other_signals_are_ignored() -> Result<()> {
    let display = HeadlessDisplay::new();
    let (mut listener, _handle) = StopListener::with_signals()?;

    let sender = {
        let display = display.clone();
        thread::spawn(move || {
            while display.live_windows().len() < 2 {
                thread::sleep(Duration::from_millis(5));
            }
            // Reported and ignored
            send_to_self(libc::SIGUSR1);
            send_to_self(libc::SIGHUP);
            thread::sleep(Duration::from_millis(100));
            let still_running = display.live_windows().len();
            send_to_self(libc::SIGINT);
            still_running
        })
    };

    let summary = harness::launch(&config(2), || display.connect(), &mut listener)?;
    assert_eq!(sender.join().unwrap(), 2);
    assert_eq!(summary.stop_reason, StopReason::Interrupt);
    assert_eq!(summary.windows(), 2);
    Ok(())
}
