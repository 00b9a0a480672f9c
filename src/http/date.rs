//! RFC 1123 `Date` header formatting.
use time::{OffsetDateTime, Weekday};

const MONTHS: [&str; 12] =
    ["Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"];

/// The canonical 7-element weekday table, indexed by `Weekday::number_days_from_monday()`
/// so Sunday (the RFC 1123 week start) lands last rather than first.
const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

fn weekday_name(day: Weekday) -> &'static str {
    WEEKDAYS[day.number_days_from_monday() as usize]
}

/// Formats `when` as `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_rfc1123(when: OffsetDateTime) -> String {
    let when = when.to_offset(time::UtcOffset::UTC);
    format!(
        "{}, {:02} {} {:04} {:02}:{:02}:{:02} GMT",
        weekday_name(when.weekday()),
        when.day(),
        MONTHS[when.month() as usize - 1],
        when.year(),
        when.hour(),
        when.minute(),
        when.second(),
    )
}

/// The `Date` header value for the current instant.
pub fn now_rfc1123() -> String {
    format_rfc1123(OffsetDateTime::now_utc())
}

#[cfg(test)]
mod test {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn formats_known_instant() {
        let when = datetime!(1994-11-06 08:49:37 UTC);
        assert_eq!(format_rfc1123(when), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn non_utc_offset_is_normalized() {
        let when = datetime!(1994-11-06 10:49:37 +2);
        assert_eq!(format_rfc1123(when), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn single_digit_day_is_zero_padded() {
        let when = datetime!(2000-01-01 00:00:00 UTC);
        assert_eq!(format_rfc1123(when), "Sat, 01 Jan 2000 00:00:00 GMT");
    }
}
