//! The Person record and the rules that turn a raw CSV row into one.

use crate::error::{Error, Result};
use crate::orm::Model;
use crate::template::TemplateValue;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use sqlx::FromRow;
use std::collections::HashMap;

/// A stored or about-to-be-stored person.
///
/// `id`, `date_created` and `date_modified` are assigned by the database and are
/// `None` on records that came straight from a CSV file.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Person {
    pub id: Option<i64>,
    pub name: String,
    pub date_of_birth: NaiveDate,
    pub weight: f64,
    pub male: bool,
    pub date_created: Option<NaiveDateTime>,
    pub date_modified: Option<NaiveDateTime>,
}

impl Person {
    pub fn new(name: impl Into<String>, date_of_birth: NaiveDate, weight: f64, male: bool) -> Self {
        Person {
            id: None,
            name: name.into(),
            date_of_birth,
            weight,
            male,
            date_created: None,
            date_modified: None,
        }
    }
}

impl Model for Person {
    fn table_name() -> &'static str {
        "People"
    }

    fn schema() -> &'static [&'static str] {
        &[
            "CREATE TABLE IF NOT EXISTS People (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                date_of_birth DATE NOT NULL,
                weight REAL NOT NULL,
                male BOOLEAN NOT NULL,
                date_created TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                date_modified TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(name, date_of_birth)
            )",
            "CREATE TRIGGER IF NOT EXISTS update_date_modified AFTER UPDATE ON People
            FOR EACH ROW
                WHEN NEW.date_of_birth != OLD.date_of_birth
                OR NEW.weight != OLD.weight
                OR NEW.male != OLD.male
            BEGIN
                UPDATE People SET date_modified = CURRENT_TIMESTAMP WHERE id = OLD.id;
            END",
        ]
    }
}

/// One CSV row as text, before any typing. Extra columns in the file are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPerson {
    pub name: String,
    pub date_of_birth: String,
    pub weight: String,
    pub male: String,
}

impl RawPerson {
    /// Validate every field, reporting the first failure against `row`.
    pub fn validate(&self, row: usize) -> Result<Person> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(Error::validation(row, "name must not be empty"));
        }
        let date_of_birth =
            parse_date(&self.date_of_birth).map_err(|m| Error::validation(row, m))?;
        let weight = parse_weight(&self.weight).map_err(|m| Error::validation(row, m))?;
        let male = parse_bool(&self.male).map_err(|m| Error::validation(row, m))?;
        Ok(Person::new(name, date_of_birth, weight, male))
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, or an ISO datetime whose date part is used.
pub fn parse_date(value: &str) -> std::result::Result<NaiveDate, String> {
    let value = value.trim();
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(date);
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(dt.date());
        }
    }
    Err(format!("date_of_birth `{}` is not a valid date", value))
}

pub fn parse_weight(value: &str) -> std::result::Result<f64, String> {
    let value = value.trim();
    match value.parse::<f64>() {
        Ok(w) if w.is_finite() && w > 0.0 => Ok(w),
        Ok(_) => Err(format!("weight `{}` must be a positive number", value)),
        Err(_) => Err(format!("weight `{}` is not a number", value)),
    }
}

pub fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "1" => Ok(true),
        "false" | "f" | "no" | "n" | "off" | "0" => Ok(false),
        other => Err(format!("male `{}` is not a boolean", other)),
    }
}

impl From<&Person> for TemplateValue {
    fn from(person: &Person) -> Self {
        let timestamp = |ts: Option<NaiveDateTime>| {
            ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default()
        };
        let mut fields = HashMap::new();
        fields.insert(
            "id".to_string(),
            TemplateValue::String(person.id.map(|id| id.to_string()).unwrap_or_default()),
        );
        fields.insert("name".to_string(), TemplateValue::String(person.name.clone()));
        fields.insert(
            "date_of_birth".to_string(),
            TemplateValue::String(person.date_of_birth.format("%Y-%m-%d").to_string()),
        );
        fields.insert("weight".to_string(), TemplateValue::Number(person.weight));
        fields.insert("male".to_string(), TemplateValue::Bool(person.male));
        fields.insert(
            "date_created".to_string(),
            TemplateValue::String(timestamp(person.date_created)),
        );
        fields.insert(
            "date_modified".to_string(),
            TemplateValue::String(timestamp(person.date_modified)),
        );
        TemplateValue::Object(fields)
    }
}
