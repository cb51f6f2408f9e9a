use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::api::UsageItem;

/// An open-ended "app X has been focused since T" record. At most one exists
/// at a time.
#[derive(Debug, Clone)]
struct Session {
    app: Arc<str>,
    opened_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TrackerState {
    session: Option<Session>,
    pending: Vec<UsageItem>,
}

/// Turns the stream of "current active app" observations into closed usage
/// intervals. Observations arrive from the sampling task while [flush] is
/// called from the upload task, so the whole state sits behind one mutex.
///
/// [flush]: SessionTracker::flush
pub struct SessionTracker {
    state: Mutex<TrackerState>,
    min_session: Duration,
}

impl SessionTracker {
    pub fn new(min_session: Duration) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            min_session,
        }
    }

    /// Feeds one observation into the state machine. `None` means nothing has
    /// focus and closes the open session. Repeated observations of the same
    /// app (case-insensitive) are debounced.
    pub fn observe(&self, now: DateTime<Utc>, current: Option<Arc<str>>) {
        let mut state = self.state.lock().unwrap();

        if let (Some(session), Some(app)) = (&state.session, &current) {
            if session.app.eq_ignore_ascii_case(app) {
                return;
            }
        }

        if let Some(closed) = state.session.take() {
            Self::close_into(&mut state.pending, closed, now, self.min_session);
        }

        state.session = current.map(|app| {
            info!("Application started: {app}");
            Session {
                app,
                opened_at: now,
            }
        });
    }

    /// Drains the pending buffer for delivery. An open session is emitted at
    /// its current length and restarted from `now`, so ongoing usage spans
    /// upload cycles without being lost or closed.
    pub fn flush(&self, now: DateTime<Utc>) -> Vec<UsageItem> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        if let Some(session) = &mut state.session {
            if now - session.opened_at >= self.min_session {
                let emitted = UsageItem {
                    app_name: session.app.clone(),
                    start_time: session.opened_at,
                    end_time: now,
                };
                // Too-young sessions keep their original start instead of
                // emitting a zero-length interval.
                session.opened_at = now;
                state.pending.push(emitted);
            }
        }

        std::mem::take(&mut state.pending)
    }

    /// Name of the app currently holding an open session, for the status
    /// channel.
    pub fn current_app(&self) -> Option<Arc<str>> {
        let state = self.state.lock().unwrap();
        state.session.as_ref().map(|s| s.app.clone())
    }

    fn close_into(
        pending: &mut Vec<UsageItem>,
        session: Session,
        now: DateTime<Utc>,
        min_session: Duration,
    ) {
        let duration = now - session.opened_at;
        if duration < min_session {
            debug!(
                "Discarding {:?} session of {}ms as flicker",
                session.app,
                duration.num_milliseconds()
            );
            return;
        }
        info!(
            "Application ended: {} after {:.1}s",
            session.app,
            duration.num_milliseconds() as f64 / 1000.0
        );
        pending.push(UsageItem {
            app_name: session.app,
            start_time: session.opened_at,
            end_time: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

    use super::SessionTracker;

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN);

    fn t0() -> chrono::DateTime<Utc> {
        Utc.from_utc_datetime(&TEST_START_DATE)
    }

    fn tracker() -> SessionTracker {
        SessionTracker::new(Duration::seconds(1))
    }

    #[test]
    fn switch_emits_closed_interval() {
        let tracker = tracker();
        tracker.observe(t0(), Some("chrome".into()));
        tracker.observe(t0() + Duration::milliseconds(2500), Some("code".into()));

        let items = tracker.flush(t0() + Duration::milliseconds(2500));
        assert_eq!(items.len(), 1);
        assert_eq!(&*items[0].app_name, "chrome");
        assert_eq!(items[0].start_time, t0());
        assert_eq!(items[0].end_time, t0() + Duration::milliseconds(2500));
    }

    #[test]
    fn flicker_below_threshold_is_discarded() {
        let tracker = tracker();
        tracker.observe(t0(), Some("chrome".into()));
        tracker.observe(t0() + Duration::milliseconds(500), Some("code".into()));

        // Nothing for chrome, code is still open.
        let items = tracker.flush(t0() + Duration::milliseconds(500));
        assert!(items.is_empty());
        assert_eq!(tracker.current_app().as_deref(), Some("code"));
    }

    #[test]
    fn same_app_observation_is_debounced() {
        let tracker = tracker();
        tracker.observe(t0(), Some("chrome".into()));
        tracker.observe(t0() + Duration::seconds(5), Some("Chrome".into()));
        tracker.observe(t0() + Duration::seconds(10), Some("CHROME".into()));

        let items = tracker.flush(t0() + Duration::seconds(20));
        assert_eq!(items.len(), 1);
        // The session kept its original start across the repeats.
        assert_eq!(items[0].start_time, t0());
        assert_eq!(items[0].end_time, t0() + Duration::seconds(20));
    }

    #[test]
    fn flush_reopens_session_from_flush_point() {
        let tracker = tracker();
        tracker.observe(t0(), Some("chrome".into()));

        let first = tracker.flush(t0() + Duration::seconds(10));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].start_time, t0());
        assert_eq!(first[0].end_time, t0() + Duration::seconds(10));

        // Session continues from the flush point, not from the original open.
        let second = tracker.flush(t0() + Duration::seconds(15));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].start_time, t0() + Duration::seconds(10));
        assert_eq!(second[0].end_time, t0() + Duration::seconds(15));
    }

    #[test]
    fn flush_keeps_too_young_session_intact() {
        let tracker = tracker();
        tracker.observe(t0(), Some("chrome".into()));

        let items = tracker.flush(t0() + Duration::milliseconds(300));
        assert!(items.is_empty());

        // The partial 300ms were not thrown away.
        let items = tracker.flush(t0() + Duration::seconds(2));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].start_time, t0());
    }

    #[test]
    fn focus_loss_closes_session() {
        let tracker = tracker();
        tracker.observe(t0(), Some("chrome".into()));
        tracker.observe(t0() + Duration::seconds(3), None);

        assert_eq!(tracker.current_app(), None);
        let items = tracker.flush(t0() + Duration::seconds(5));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].end_time, t0() + Duration::seconds(3));
    }
}
