//! Periodic re-evaluation of session stats for display.

use std::sync::Arc;
use std::time::Duration;

use cylinder_sessions::{compute_stats, CylinderSession, SessionError, SessionStats};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::{Stream, StreamExt};

use crate::clock::Clock;

/// Stats for `session` recomputed every `period`, starting immediately.
///
/// Reads only; nothing is written back to the store. Closed sessions yield
/// the same value on every tick.
pub fn live_stats(
    session: CylinderSession,
    clock: Arc<dyn Clock>,
    period: Duration,
) -> impl Stream<Item = Result<SessionStats, SessionError>> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    IntervalStream::new(interval).map(move |_| compute_stats(&session, clock.now_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use cylinder_sessions::{HeatLevel, SessionDraft, SessionPatch, UsageLog};

    const HOUR: i64 = 3_600_000;

    #[tokio::test]
    async fn test_active_session_grows_with_clock() {
        let clock = Arc::new(ManualClock::new(HOUR));
        let mut session = SessionDraft::starting_at(0).into_session("s");
        session.logs.push(UsageLog::new(HOUR, HeatLevel::Level2));

        let stream = live_stats(session, clock.clone(), Duration::from_millis(10));
        tokio::pin!(stream);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.hours_l1, 1.0);
        assert_eq!(first.hours_l2, 0.0);

        clock.set(2 * HOUR);
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.hours_l1, 1.0);
        assert_eq!(second.hours_l2, 1.0);
        assert_eq!(second.total_units, 3.0);
    }

    #[tokio::test]
    async fn test_closed_session_is_stable() {
        let clock = Arc::new(ManualClock::new(HOUR));
        let mut session = SessionDraft::starting_at(0).into_session("s");
        SessionPatch::close(HOUR).apply(&mut session);

        let stream = live_stats(session, clock.clone(), Duration::from_millis(10));
        tokio::pin!(stream);

        let first = stream.next().await.unwrap().unwrap();
        clock.advance(Duration::from_secs(3_600));
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.total_hours, 1.0);
    }
}
