use crate::common::{Period, Window};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Utc};

/// Resolves the window of `period` containing `now`.
///
/// Boundaries are UTC midnights: days start at 00:00, weeks on Monday and
/// months on the 1st. `AllTime` is unbounded on both sides. The result only
/// depends on `now`, so resolving twice at the same instant yields the same
/// window.
pub fn resolve(period: Period, now: DateTime<Utc>) -> Window {
    let today = now.date_naive();
    match period {
        Period::Daily => Window::between(midnight(today), midnight(today + Duration::days(1))),
        Period::Weekly => {
            let monday =
                today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
            Window::between(midnight(monday), midnight(monday + Duration::weeks(1)))
        }
        Period::Monthly => {
            let first = today.with_day(1).unwrap_or(today);
            let next = first.checked_add_months(Months::new(1)).unwrap_or(first);
            Window::between(midnight(first), midnight(next))
        }
        Period::AllTime => Window::unbounded(),
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn resolving_twice_gives_the_same_window() {
        let now = at(2026, 10, 14, 17);
        for period in Period::ALL {
            assert_eq!(resolve(period, now), resolve(period, now));
        }
    }

    #[test]
    fn daily_window_covers_the_current_day() {
        let window = resolve(Period::Daily, at(2026, 10, 14, 17));
        assert_eq!(window, Window::between(at(2026, 10, 14, 0), at(2026, 10, 15, 0)));
    }

    #[test]
    fn weekly_window_starts_on_monday() {
        // 2026-10-14 is a Wednesday.
        let window = resolve(Period::Weekly, at(2026, 10, 14, 17));
        assert_eq!(window, Window::between(at(2026, 10, 12, 0), at(2026, 10, 19, 0)));

        let monday = resolve(Period::Weekly, at(2026, 10, 12, 0));
        assert_eq!(monday, window);

        let sunday = resolve(Period::Weekly, at(2026, 10, 18, 23));
        assert_eq!(sunday, window);
    }

    #[test]
    fn monthly_window_rolls_over_the_year() {
        let window = resolve(Period::Monthly, at(2026, 12, 31, 23));
        assert_eq!(window, Window::between(at(2026, 12, 1, 0), at(2027, 1, 1, 0)));
    }

    #[test]
    fn all_time_is_unbounded() {
        assert_eq!(resolve(Period::AllTime, at(2026, 1, 1, 0)), Window::unbounded());
    }
}
