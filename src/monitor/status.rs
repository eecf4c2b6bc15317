//! Maps probe outcomes to site status and decides when to notify.

use crate::db::{CheckOutcome, SiteStatus};
use crate::notify::NotificationKind;

/// The status a site ends up in after a check with this outcome.
pub fn resolve(outcome: CheckOutcome) -> SiteStatus {
    match outcome {
        CheckOutcome::Success => SiteStatus::Up,
        CheckOutcome::Failure => SiteStatus::Down,
        CheckOutcome::Timeout => SiteStatus::Degraded,
        CheckOutcome::Error => SiteStatus::Unknown,
    }
}

/// Which notification, if any, a status change warrants.
///
/// Only edges notify: a site that keeps failing alerts once.
pub fn notification_for(previous: SiteStatus, current: SiteStatus) -> Option<NotificationKind> {
    if previous == current {
        return None;
    }

    match (previous, current) {
        (SiteStatus::Down | SiteStatus::Degraded, SiteStatus::Up) => Some(NotificationKind::Recovery),
        (_, SiteStatus::Down | SiteStatus::Degraded) => Some(NotificationKind::Alert),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SiteStatus; 5] = [
        SiteStatus::Up,
        SiteStatus::Down,
        SiteStatus::Degraded,
        SiteStatus::Maintenance,
        SiteStatus::Unknown,
    ];

    #[test]
    fn test_resolve() {
        assert_eq!(resolve(CheckOutcome::Success), SiteStatus::Up);
        assert_eq!(resolve(CheckOutcome::Failure), SiteStatus::Down);
        assert_eq!(resolve(CheckOutcome::Timeout), SiteStatus::Degraded);
        assert_eq!(resolve(CheckOutcome::Error), SiteStatus::Unknown);
    }

    #[test]
    fn test_unchanged_status_never_notifies() {
        for status in ALL {
            assert_eq!(notification_for(status, status), None);
        }
    }

    #[test]
    fn test_every_transition() {
        const N: Option<NotificationKind> = None;
        const A: Option<NotificationKind> = Some(NotificationKind::Alert);
        const R: Option<NotificationKind> = Some(NotificationKind::Recovery);

        // Rows are the previous status, columns the current one, both in `ALL` order:
        //   UP, DOWN, DEGRADED, MAINTENANCE, UNKNOWN
        let expected = [
            [N, A, A, N, N], // from UP
            [R, N, A, N, N], // from DOWN
            [R, A, N, N, N], // from DEGRADED
            [N, A, A, N, N], // from MAINTENANCE
            [N, A, A, N, N], // from UNKNOWN
        ];

        for (row, previous) in ALL.into_iter().enumerate() {
            for (col, current) in ALL.into_iter().enumerate() {
                assert_eq!(
                    notification_for(previous, current),
                    expected[row][col],
                    "{} -> {}",
                    previous,
                    current
                );
            }
        }
    }

    #[test]
    fn test_first_success_is_not_a_recovery() {
        assert_eq!(notification_for(SiteStatus::Unknown, SiteStatus::Up), None);
        assert_eq!(notification_for(SiteStatus::Maintenance, SiteStatus::Up), None);
        assert_eq!(notification_for(SiteStatus::Up, SiteStatus::Unknown), None);
        assert_eq!(
            notification_for(SiteStatus::Down, SiteStatus::Degraded),
            Some(NotificationKind::Alert)
        );
    }
}
