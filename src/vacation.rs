//! Vacation entries: validation, local storage and rendering.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::{Error, Result};

/// Storage key for the vacation list
pub const STORAGE_KEY: &str = "vacation_tracker";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vacation {
  pub start_date: NaiveDate,
  pub end_date: NaiveDate,
}

impl Vacation {
  /// Parse and validate a date range. Both dates are required and the range
  /// may not end before it starts.
  pub fn parse(start: &str, end: &str) -> Result<Self> {
    let start_date = parse_date(start)?;
    let end_date = parse_date(end)?;

    if start_date > end_date {
      return Err(Error::InvalidInput(format!(
        "vacation ends ({}) before it starts ({})",
        end_date, start_date
      )));
    }

    Ok(Self {
      start_date,
      end_date,
    })
  }

  pub fn to_payload(&self) -> Result<String> {
    Ok(serde_json::to_string(self)?)
  }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
  let s = s.trim();
  if s.is_empty() {
    return Err(Error::InvalidInput("missing date".to_string()));
  }
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::InvalidInput(format!("bad date '{}': {}", s, e)))
}

/// Vacation list kept in the store as one JSON document.
#[derive(Clone)]
pub struct VacationStore {
  db: Database,
}

impl VacationStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Every stored vacation, newest first. Empty when nothing is stored.
  pub async fn all(&self) -> Result<Vec<Vacation>> {
    match self.db.get_value(STORAGE_KEY).await? {
      Some(json) => Ok(serde_json::from_str(&json)?),
      None => Ok(Vec::new()),
    }
  }

  /// Add a vacation and keep the list sorted newest to oldest.
  pub async fn add(&self, vacation: Vacation) -> Result<Vec<Vacation>> {
    let mut vacations = self.all().await?;
    vacations.push(vacation);
    vacations.sort_by(|a, b| b.start_date.cmp(&a.start_date));

    self
      .db
      .set_value(STORAGE_KEY, &serde_json::to_string(&vacations)?)
      .await?;
    Ok(vacations)
  }
}

/// US-style date, e.g. `7/4/2024`.
pub fn format_date(date: NaiveDate) -> String {
  date.format("%-m/%-d/%Y").to_string()
}

/// Render the "Past Vacations" list, or nothing when the list is empty.
pub fn render(vacations: &[Vacation]) -> String {
  if vacations.is_empty() {
    return String::new();
  }

  let mut out = String::from("Past Vacations\n");
  for v in vacations {
    out.push_str(&format!(
      "  From {} to {}\n",
      format_date(v.start_date),
      format_date(v.end_date)
    ));
  }
  out
}
