//! Stream liveness watchdog
//!
//! A half-open SSH connection can go silent without the transport noticing.
//! The watchdog expects [`Watchdog::signal`] at least once per timeout and
//! otherwise calls its stale callback, unless the current local time falls
//! inside one of the configured exemption windows.

use chrono::{Datelike, Local, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Recurring time-of-day interval in which stream silence is expected
///
/// `start > end` wraps past midnight; `start == end` covers the whole day.
/// An empty `weekdays` list applies the window to every day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
}

impl WatchdogWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            start,
            end,
            weekdays: Vec::new(),
        }
    }

    pub fn on_weekdays(mut self, weekdays: impl IntoIterator<Item = Weekday>) -> Self {
        self.weekdays = weekdays.into_iter().collect();
        self
    }

    /// Whether `at` falls inside this window
    pub fn contains(&self, at: NaiveDateTime) -> bool {
        if !self.weekdays.is_empty() && !self.weekdays.contains(&at.weekday()) {
            return false;
        }

        let time = at.time();
        if self.start == self.end {
            true
        } else if self.start < self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

impl fmt::Display for WatchdogWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)?;
        if !self.weekdays.is_empty() {
            write!(f, " {:?}", self.weekdays)?;
        }
        Ok(())
    }
}

/// Whether any window contains `at`
pub fn is_exempt(windows: &[WatchdogWindow], at: NaiveDateTime) -> bool {
    windows.iter().any(|window| window.contains(at))
}

/// Timer that fires a callback when liveness signals stop arriving
///
/// The timer task stops on [`Watchdog::shutdown`] or when the watchdog is
/// dropped.
#[derive(Debug)]
pub struct Watchdog {
    signal: Arc<Notify>,
    cancel: CancellationToken,
}

impl Watchdog {
    /// Start the watchdog timer on the current tokio runtime
    pub fn start<F>(timeout: Duration, windows: Vec<WatchdogWindow>, on_stale: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let signal = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        tokio::spawn(Self::run(
            timeout,
            windows,
            on_stale,
            Arc::clone(&signal),
            cancel.clone(),
        ));

        debug!(timeout_secs = timeout.as_secs(), "Stream watchdog started");
        Self { signal, cancel }
    }

    /// Reset the staleness clock
    pub fn signal(&self) {
        self.signal.notify_one();
    }

    /// Stop the timer; safe to call any number of times
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Stream watchdog stopped");
        }
        self.cancel.cancel();
    }

    /// Whether the timer is still running
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    async fn run<F>(
        timeout: Duration,
        windows: Vec<WatchdogWindow>,
        on_stale: F,
        signal: Arc<Notify>,
        cancel: CancellationToken,
    ) where
        F: Fn() + Send + Sync + 'static,
    {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = signal.notified() => {}

                _ = tokio::time::sleep(timeout) => {
                    let now = Local::now().naive_local();
                    if is_exempt(&windows, now) {
                        debug!(%now, "Stream silent inside an exemption window, ignoring");
                    } else {
                        warn!(
                            timeout_secs = timeout.as_secs(),
                            "No data received on the event stream within the timeout"
                        );
                        on_stale();
                    }
                }
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        // 2024-01-01 is a Monday
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn counting_watchdog(
        timeout: Duration,
        windows: Vec<WatchdogWindow>,
    ) -> (Watchdog, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        let watchdog = Watchdog::start(timeout, windows, move || {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        (watchdog, count)
    }

    #[test]
    fn test_window_same_day() {
        let window = WatchdogWindow::new(hm(2, 0), hm(4, 30));
        assert!(window.contains(at(1, 2, 0)));
        assert!(window.contains(at(1, 4, 29)));
        assert!(!window.contains(at(1, 4, 30)));
        assert!(!window.contains(at(1, 1, 59)));
    }

    #[test]
    fn test_window_wraps_midnight() {
        let window = WatchdogWindow::new(hm(22, 0), hm(6, 0));
        assert!(window.contains(at(1, 23, 0)));
        assert!(window.contains(at(1, 5, 59)));
        assert!(!window.contains(at(1, 12, 0)));
    }

    #[test]
    fn test_window_restricted_to_weekdays() {
        let window = WatchdogWindow::new(hm(0, 0), hm(0, 0)).on_weekdays([Weekday::Sat, Weekday::Sun]);
        assert!(!window.contains(at(1, 12, 0))); // Monday
        assert!(window.contains(at(6, 12, 0))); // Saturday
        assert!(window.contains(at(7, 3, 0))); // Sunday
    }

    #[test]
    fn test_any_window_exempts() {
        let windows = vec![
            WatchdogWindow::new(hm(1, 0), hm(2, 0)),
            WatchdogWindow::new(hm(13, 0), hm(14, 0)),
        ];
        assert!(is_exempt(&windows, at(2, 13, 30)));
        assert!(!is_exempt(&windows, at(2, 12, 30)));
        assert!(!is_exempt(&[], at(2, 12, 30)));
    }

    #[test]
    fn test_window_deserializes_from_toml() {
        let window: WatchdogWindow =
            toml::from_str("start = \"22:00:00\"\nend = \"06:00:00\"\nweekdays = [\"Sat\", \"Sun\"]\n")
                .unwrap();
        assert_eq!(window.start, hm(22, 0));
        assert_eq!(window.weekdays, vec![Weekday::Sat, Weekday::Sun]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_per_silent_timeout() {
        let (watchdog, count) = counting_watchdog(Duration::from_secs(10), Vec::new());

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        watchdog.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_resets_clock() {
        let (watchdog, count) = counting_watchdog(Duration::from_secs(10), Vec::new());

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            watchdog.signal();
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exemption_window_suppresses_callback() {
        let whole_day = WatchdogWindow::new(hm(0, 0), hm(0, 0));
        let (_watchdog, count) = counting_watchdog(Duration::from_secs(10), vec![whole_day]);

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent() {
        let (watchdog, count) = counting_watchdog(Duration::from_secs(10), Vec::new());

        watchdog.shutdown();
        watchdog.shutdown();
        assert!(!watchdog.is_running());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
