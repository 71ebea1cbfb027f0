//! Relative-time phrase parser.
//!
//! Understands the canonical (post-substitution) vocabulary of chat last-seen
//! phrases and resolves it against an anchor instant:
//!
//! - `now`
//! - a day: `today`, `yesterday`, a weekday name, or an explicit date
//!   (`12 march`, `march 12 2024`, `12.03.2024`, `12/03/2024`, `2024-03-12`)
//! - optionally followed by `at` and a clock time (`15:04`, `3:04pm`, `3 pm`)
//! - or a bare clock time, meaning today
//!
//! Calendar arithmetic happens in the anchor's time zone, so results do not
//! depend on the process locale or `TZ`.

use chrono::{
    DateTime, Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday,
};

/// Filler words dropped before parsing.
const FILLER: &[&str] = &["at", "on", "the", "of"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meridiem {
    Am,
    Pm,
}

/// Resolve `phrase` against `anchor`. Returns `None` when the phrase does not
/// fit the grammar or names an impossible date/time.
pub fn parse_relative<Tz: TimeZone>(phrase: &str, anchor: &DateTime<Tz>) -> Option<DateTime<Utc>> {
    let lowered = phrase.to_lowercase().replace(',', " ");
    let tokens: Vec<&str> = lowered
        .split_whitespace()
        .filter(|t| !FILLER.contains(t))
        .collect();

    match tokens.as_slice() {
        [] => return None,
        ["now"] => return Some(anchor.with_timezone(&Utc)),
        _ => {}
    }

    let today = anchor.naive_local().date();
    let (day_tokens, time) = split_clock(&tokens)?;
    let date = match day_tokens {
        [] if time.is_some() => today,
        [] => return None,
        day => parse_day(day, today)?,
    };

    let naive = NaiveDateTime::new(date, time.unwrap_or(NaiveTime::MIN));
    anchor
        .timezone()
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Peel a trailing clock time off the token list.
///
/// Returns `None` only when the tail looks like a time but is invalid
/// (e.g. `25:00`); a tail without any time yields `(tokens, None)`.
fn split_clock<'a, 'b>(tokens: &'b [&'a str]) -> Option<(&'b [&'a str], Option<NaiveTime>)> {
    let Some((last, head)) = tokens.split_last() else {
        return Some((tokens, None));
    };

    if let Some(meridiem) = meridiem_token(last) {
        // "3:00 pm" / "3 pm"
        let (clock, rest) = head.split_last()?;
        return parse_clock(clock, Some(meridiem)).map(|t| (rest, Some(t)));
    }

    if looks_like_clock(last) {
        return parse_clock(last, None).map(|t| (head, Some(t)));
    }

    Some((tokens, None))
}

fn meridiem_token(tok: &str) -> Option<Meridiem> {
    match tok {
        "am" => Some(Meridiem::Am),
        "pm" => Some(Meridiem::Pm),
        _ => None,
    }
}

fn looks_like_clock(tok: &str) -> bool {
    let body = tok
        .strip_suffix("am")
        .or_else(|| tok.strip_suffix("pm"))
        .unwrap_or(tok);
    let has_suffix = body.len() != tok.len();
    !body.is_empty()
        && body.chars().all(|c| c.is_ascii_digit() || c == ':')
        && (body.contains(':') || has_suffix)
}

fn parse_clock(tok: &str, meridiem: Option<Meridiem>) -> Option<NaiveTime> {
    let (body, meridiem) = match (tok.strip_suffix("am"), tok.strip_suffix("pm")) {
        (Some(b), _) => (b, Some(Meridiem::Am)),
        (_, Some(b)) => (b, Some(Meridiem::Pm)),
        _ => (tok, meridiem),
    };

    let (hour, minute) = match body.split_once(':') {
        Some((h, m)) if m.len() == 2 => (h.parse::<u32>().ok()?, m.parse::<u32>().ok()?),
        Some(_) => return None,
        // A bare number is only a time when a meridiem says so.
        None if meridiem.is_some() => (body.parse::<u32>().ok()?, 0),
        None => return None,
    };

    let hour = match meridiem {
        Some(_) if !(1..=12).contains(&hour) => return None,
        Some(Meridiem::Am) => hour % 12,
        Some(Meridiem::Pm) => hour % 12 + 12,
        None => hour,
    };

    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn parse_day(tokens: &[&str], today: NaiveDate) -> Option<NaiveDate> {
    match tokens {
        ["today"] => Some(today),
        ["yesterday"] => today.checked_sub_days(Days::new(1)),
        [word] => match parse_weekday(word) {
            Some(weekday) => Some(most_recent(weekday, today)),
            None => parse_numeric_date(word),
        },
        [a, b] => {
            let (day, month) = day_month(a, b)?;
            year_less(day, month, today)
        }
        [a, b, year] => {
            let (day, month) = day_month(a, b)?;
            let year = year.parse::<i32>().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        }
        _ => None,
    }
}

/// Accept both `12 march` and `march 12`.
fn day_month(a: &str, b: &str) -> Option<(u32, u32)> {
    if let Some(month) = parse_month(b) {
        return Some((parse_day_number(a)?, month));
    }
    let month = parse_month(a)?;
    Some((parse_day_number(b)?, month))
}

fn parse_day_number(tok: &str) -> Option<u32> {
    let digits = tok.trim_end_matches('.');
    let digits = ["st", "nd", "rd", "th"]
        .iter()
        .find_map(|s| digits.strip_suffix(s))
        .unwrap_or(digits);
    digits.parse::<u32>().ok().filter(|d| (1..=31).contains(d))
}

/// Year-less dates are in the past: if this year's date is still ahead of
/// the anchor, it refers to last year.
fn year_less(day: u32, month: u32, today: NaiveDate) -> Option<NaiveDate> {
    match NaiveDate::from_ymd_opt(today.year(), month, day) {
        Some(date) if date <= today => Some(date),
        _ => NaiveDate::from_ymd_opt(today.year() - 1, month, day),
    }
}

/// `12.03.2024`, `12/03/2024` (day first) or ISO `2024-03-12`.
fn parse_numeric_date(tok: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(tok, "%Y-%m-%d") {
        return Some(date);
    }
    ["%d.%m.%Y", "%d/%m/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(tok, fmt).ok())
}

/// Most recent day strictly before `today` falling on `weekday`.
fn most_recent(weekday: Weekday, today: NaiveDate) -> NaiveDate {
    let back = (today.weekday().num_days_from_monday() + 7 - weekday.num_days_from_monday()) % 7;
    let back = if back == 0 { 7 } else { back };
    today - Days::new(u64::from(back))
}

fn parse_weekday(tok: &str) -> Option<Weekday> {
    let weekday = match tok {
        "monday" | "mon" => Weekday::Mon,
        "tuesday" | "tue" | "tues" => Weekday::Tue,
        "wednesday" | "wed" => Weekday::Wed,
        "thursday" | "thu" | "thurs" => Weekday::Thu,
        "friday" | "fri" => Weekday::Fri,
        "saturday" | "sat" => Weekday::Sat,
        "sunday" | "sun" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

fn parse_month(tok: &str) -> Option<u32> {
    let month = match tok.trim_end_matches('.') {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sep" | "sept" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}
