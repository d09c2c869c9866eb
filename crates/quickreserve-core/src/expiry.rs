//! Reservation expiry evaluation

use chrono::{DateTime, Local};
use quickreserve_api::Reservation;

/// Whether `reservation` is in force at `now`.
///
/// Eternal reservations are always active. A timed reservation stops being
/// active at the instant `reserved_until` is reached.
pub fn is_active(reservation: Option<&Reservation>, now: DateTime<Local>) -> bool {
    match reservation {
        None => false,
        Some(r) => match r.reserved_until {
            None => true,
            Some(until) => now < until,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 11, 14, 12, 0, 0).unwrap()
    }

    fn reservation(until: Option<DateTime<Local>>) -> Reservation {
        Reservation {
            holder_name: "Test User".into(),
            reserved_at: noon() - Duration::hours(1),
            reserved_until: until,
        }
    }

    #[test]
    fn test_absent_is_inactive() {
        assert!(!is_active(None, noon()));
    }

    #[test]
    fn test_eternal_never_expires() {
        let r = reservation(None);
        assert!(is_active(Some(&r), noon()));
        assert!(is_active(Some(&r), noon() + Duration::days(365 * 100)));
    }

    #[test]
    fn test_expiry_boundary() {
        let r = reservation(Some(noon()));
        assert!(is_active(Some(&r), noon() - Duration::seconds(1)));
        assert!(!is_active(Some(&r), noon()));
        assert!(!is_active(Some(&r), noon() + Duration::seconds(1)));
    }
}
