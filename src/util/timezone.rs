use chrono::{DateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::warn;

/// Current instant expressed in the given zone's wall-clock offset.
pub fn local_now(tz: Tz) -> OffsetDateTime {
    localize(OffsetDateTime::now_utc(), tz)
}

/// Re-express `instant` in the offset `tz` observes at that instant.
pub fn localize(instant: OffsetDateTime, tz: Tz) -> OffsetDateTime {
    instant.to_offset(offset_at(instant, tz))
}

/// Start of `date` on the wall clock of `tz`, carrying the offset in effect
/// at that midnight rather than the one of any other moment of the day.
pub fn local_midnight(date: Date, tz: Tz) -> OffsetDateTime {
    let wall = date.midnight();
    let guess = wall.assume_offset(offset_at(wall.assume_utc(), tz));
    wall.assume_offset(offset_at(guess, tz))
}

/// UTC offset in effect for `tz` at `instant`, honoring daylight saving.
pub fn offset_at(instant: OffsetDateTime, tz: Tz) -> UtcOffset {
    let utc = instant.to_offset(UtcOffset::UTC);
    let Some(datetime_utc) = DateTime::<Utc>::from_timestamp(utc.unix_timestamp(), 0) else {
        warn!(timezone = %tz, "instant outside chrono range; using UTC");
        return UtcOffset::UTC;
    };

    let seconds = tz
        .offset_from_utc_datetime(&datetime_utc.naive_utc())
        .fix()
        .local_minus_utc();
    UtcOffset::from_whole_seconds(seconds).unwrap_or_else(|err| {
        warn!(timezone = %tz, error = %err, "unrepresentable offset; using UTC");
        UtcOffset::UTC
    })
}
