// Session scheduling: overlap detection and per-group serialization.
//
// A group's sessions must never overlap. Two windows conflict when they share
// any instant; touching endpoints (one ends exactly when the other starts) do
// not conflict. The scan is O(n) over a group's sessions, which stay in the
// single digits in practice.
//
// The overlap check and the subsequent insert are not one storage operation,
// so creates/edits for the same group run under a per-group async mutex
// (`GroupLocks`). Different groups proceed in parallel; chat publishes are
// never serialized since appends commute.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use studia_common::civil::TemporalError;
use studia_common::types::StudySession;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

/// A validated candidate time window: `starts_at < ends_at` holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateWindow {
    starts_at: NaiveDateTime,
    ends_at: NaiveDateTime,
}

impl CandidateWindow {
    pub fn new(starts_at: NaiveDateTime, ends_at: NaiveDateTime) -> Result<Self, TemporalError> {
        if ends_at <= starts_at {
            return Err(TemporalError::EmptyRange);
        }
        Ok(Self { starts_at, ends_at })
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.starts_at
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.ends_at
    }

    /// Shared-instant test over half-open [start, end) ranges.
    fn overlaps(&self, other_start: NaiveDateTime, other_end: NaiveDateTime) -> bool {
        self.starts_at < other_end && other_start < self.ends_at
    }
}

/// A stored session the candidate collides with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConflict {
    pub session_id: Uuid,
    pub name: String,
}

/// Check a candidate window against a group's stored sessions.
///
/// `exclude` skips one stored session by id so that editing a session does
/// not conflict with its own previous time range.
///
/// Returns every conflicting session, not just the first, so the caller can
/// name them all in the rejection.
pub fn check_overlap(
    candidate: CandidateWindow,
    existing: &[StudySession],
    exclude: Option<Uuid>,
) -> Result<(), Vec<SessionConflict>> {
    let conflicts: Vec<SessionConflict> = existing
        .iter()
        .filter(|session| exclude != Some(session.id))
        .filter(|session| candidate.overlaps(session.starts_at(), session.ends_at()))
        .map(|session| SessionConflict { session_id: session.id, name: session.name.clone() })
        .collect();

    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(conflicts)
    }
}

/// Lazily-populated per-group mutexes serializing check-then-insert.
///
/// Lock entries are never reclaimed; a group contributes one `Mutex<()>` for
/// the process lifetime, which is negligible at this scale.
#[derive(Debug, Clone, Default)]
pub struct GroupLocks {
    locks: Arc<RwLock<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl GroupLocks {
    pub async fn acquire(&self, group_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let guard = self.locks.read().await;
            guard.get(&group_id).cloned()
        };

        let lock = match lock {
            Some(lock) => lock,
            None => {
                let mut guard = self.locks.write().await;
                guard.entry(group_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
            }
        };

        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use studia_common::civil;

    use super::*;

    fn window(start: &str, end: &str) -> CandidateWindow {
        let (start_date, start_time) = start.split_once(' ').expect("start has date and time");
        let (end_date, end_time) = end.split_once(' ').expect("end has date and time");
        CandidateWindow::new(
            civil::to_instant(start_date, start_time).expect("valid start"),
            civil::to_instant(end_date, end_time).expect("valid end"),
        )
        .expect("non-empty window")
    }

    fn stored(name: &str, start: &str, end: &str) -> StudySession {
        let window = window(start, end);
        StudySession {
            id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            name: name.to_string(),
            start_date: window.starts_at().date(),
            start_time: window.starts_at().time(),
            end_date: window.ends_at().date(),
            end_time: window.ends_at().time(),
            accepted_by: vec![],
        }
    }

    // ── CandidateWindow ─────────────────────────────────────────────

    #[test]
    fn empty_and_inverted_windows_are_rejected() {
        let at = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(10, 0, 0).unwrap();
        let later = at + chrono::Duration::hours(1);

        assert_eq!(CandidateWindow::new(at, at), Err(TemporalError::EmptyRange));
        assert_eq!(CandidateWindow::new(later, at), Err(TemporalError::EmptyRange));
        assert!(CandidateWindow::new(at, later).is_ok());
    }

    // ── check_overlap ───────────────────────────────────────────────

    #[test]
    fn disjoint_sessions_do_not_conflict() {
        let existing = vec![stored("morning", "2024-06-01 10:00", "2024-06-01 11:00")];
        let candidate = window("2024-06-01 12:00", "2024-06-01 13:00");

        assert!(check_overlap(candidate, &existing, None).is_ok());
    }

    #[test]
    fn touching_endpoints_do_not_conflict() {
        let existing = vec![stored("morning", "2024-06-01 10:00", "2024-06-01 11:00")];

        let right_after = window("2024-06-01 11:00", "2024-06-01 12:00");
        assert!(check_overlap(right_after, &existing, None).is_ok());

        let right_before = window("2024-06-01 09:00", "2024-06-01 10:00");
        assert!(check_overlap(right_before, &existing, None).is_ok());
    }

    #[test]
    fn partial_overlap_conflicts_and_names_the_session() {
        let existing = vec![stored("morning", "2024-06-01 10:00", "2024-06-01 11:00")];
        let candidate = window("2024-06-01 10:30", "2024-06-01 11:30");

        let conflicts = check_overlap(candidate, &existing, None)
            .expect_err("overlapping candidate should conflict");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].name, "morning");
        assert_eq!(conflicts[0].session_id, existing[0].id);
    }

    #[test]
    fn containment_conflicts_in_both_directions() {
        let existing = vec![stored("long", "2024-06-01 09:00", "2024-06-01 17:00")];

        let inside = window("2024-06-01 10:00", "2024-06-01 11:00");
        assert!(check_overlap(inside, &existing, None).is_err());

        let around = window("2024-06-01 08:00", "2024-06-01 18:00");
        assert!(check_overlap(around, &existing, None).is_err());
    }

    #[test]
    fn overlap_verdict_is_commutative() {
        let a = stored("a", "2024-06-01 10:00", "2024-06-01 12:00");
        let b = stored("b", "2024-06-01 11:00", "2024-06-01 13:00");

        let a_window = CandidateWindow::new(a.starts_at(), a.ends_at()).unwrap();
        let b_window = CandidateWindow::new(b.starts_at(), b.ends_at()).unwrap();

        let a_vs_b = check_overlap(a_window, std::slice::from_ref(&b), None).is_err();
        let b_vs_a = check_overlap(b_window, std::slice::from_ref(&a), None).is_err();
        assert_eq!(a_vs_b, b_vs_a);
        assert!(a_vs_b);
    }

    #[test]
    fn edit_excludes_own_previous_interval() {
        let session = stored("unchanged", "2024-06-01 10:00", "2024-06-01 11:00");
        let same_window =
            CandidateWindow::new(session.starts_at(), session.ends_at()).unwrap();

        // Without exclusion the unchanged edit would self-conflict.
        assert!(check_overlap(same_window, std::slice::from_ref(&session), None).is_err());
        assert!(
            check_overlap(same_window, std::slice::from_ref(&session), Some(session.id)).is_ok()
        );
    }

    #[test]
    fn all_conflicting_sessions_are_reported() {
        let existing = vec![
            stored("first", "2024-06-01 10:00", "2024-06-01 11:00"),
            stored("second", "2024-06-01 11:30", "2024-06-01 12:30"),
            stored("elsewhere", "2024-06-02 10:00", "2024-06-02 11:00"),
        ];
        let candidate = window("2024-06-01 10:30", "2024-06-01 12:00");

        let conflicts =
            check_overlap(candidate, &existing, None).expect_err("candidate spans two sessions");
        let names: Vec<&str> = conflicts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn multi_day_sessions_compare_across_dates() {
        let existing = vec![stored("overnight", "2024-06-01 22:00", "2024-06-02 02:00")];

        let next_morning = window("2024-06-02 02:00", "2024-06-02 03:00");
        assert!(check_overlap(next_morning, &existing, None).is_ok());

        let past_midnight = window("2024-06-02 01:00", "2024-06-02 04:00");
        assert!(check_overlap(past_midnight, &existing, None).is_err());
    }

    // ── GroupLocks ──────────────────────────────────────────────────

    #[tokio::test]
    async fn same_group_lock_serializes() {
        let locks = GroupLocks::default();
        let group_id = Uuid::new_v4();

        let held = locks.acquire(group_id).await;
        let contended = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(group_id).await;
            })
        };

        tokio::task::yield_now().await;
        assert!(!contended.is_finished());

        drop(held);
        contended.await.expect("contended acquire should complete after release");
    }

    #[tokio::test]
    async fn different_groups_do_not_contend() {
        let locks = GroupLocks::default();

        let _first = locks.acquire(Uuid::new_v4()).await;
        // Acquiring a second group's lock must not block on the first.
        let _second = locks.acquire(Uuid::new_v4()).await;
    }
}
