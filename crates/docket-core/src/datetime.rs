use anyhow::anyhow;
use chrono::{
  DateTime,
  Datelike,
  Duration,
  NaiveDate,
  Utc,
  Weekday
};
use chrono_tz::Tz;

pub const TIMEZONE_ENV_VAR: &str =
  "DOCKET_TIMEZONE";

const DAY_NAMES: [&str; 7] = [
  "sunday",
  "monday",
  "tuesday",
  "wednesday",
  "thursday",
  "friday",
  "saturday"
];

/// Picks the timezone used for weekday
/// and "today" decisions: the env var,
/// then the configured value, then UTC.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "config")
  {
    return tz;
  }

  chrono_tz::UTC
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "configured timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Day of week of `now` in `tz`,
/// 0 = Sunday .. 6 = Saturday.
#[must_use]
pub fn weekday_index(
  now: DateTime<Utc>,
  tz: Tz
) -> u8 {
  now
    .with_timezone(&tz)
    .weekday()
    .num_days_from_sunday() as u8
}

#[must_use]
pub fn local_date(
  now: DateTime<Utc>,
  tz: Tz
) -> NaiveDate {
  now.with_timezone(&tz).date_naive()
}

#[must_use]
pub fn day_name(day: u8) -> &'static str {
  DAY_NAMES
    .get(day as usize)
    .copied()
    .unwrap_or("?")
}

/// Accepts `0`-`6` or a weekday name
/// (full or abbreviated).
pub fn parse_weekday(
  input: &str
) -> anyhow::Result<u8> {
  let token =
    input.trim().to_ascii_lowercase();

  if let Ok(day) = token.parse::<u8>() {
    if day <= 6 {
      return Ok(day);
    }
    return Err(anyhow!(
      "weekday must be 0-6, got {day}"
    ));
  }

  let weekday = token
    .parse::<Weekday>()
    .map_err(|_| {
      anyhow!(
        "invalid weekday: {input}"
      )
    })?;
  Ok(
    weekday.num_days_from_sunday()
      as u8
  )
}

/// Accepts `today`, `tomorrow` or an
/// ISO `YYYY-MM-DD` date.
#[tracing::instrument(skip(now, tz))]
pub fn parse_due_date(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<NaiveDate> {
  let token =
    input.trim().to_ascii_lowercase();
  let today = local_date(now, tz);

  match token.as_str() {
    | "today" => Ok(today),
    | "tomorrow" => {
      Ok(today + Duration::days(1))
    }
    | _ => {
      NaiveDate::parse_from_str(
        &token, "%Y-%m-%d"
      )
      .map_err(|err| {
        anyhow!(
          "invalid date {input}: {err}"
        )
      })
    }
  }
}
