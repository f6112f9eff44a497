//! CSV to People import.

use crate::error::{Error, Result};
use crate::model::{Person, RawPerson};
use crate::orm;
use log::{debug, info};
use sqlx::sqlite::SqliteConnection;
use std::io::Read;

/// Columns a file must have; any others are ignored.
pub const REQUIRED_COLUMNS: [&str; 4] = ["name", "date_of_birth", "weight", "male"];

/// Parse a CSV file with a header row into people, one per data row in file order.
///
/// Fails with [`Error::MissingColumns`] before reading any rows if a required
/// column is absent, and with [`Error::Validation`] on the first row that does
/// not type-check.
pub fn read_csv_as_people<R: Read>(source: R) -> Result<Vec<Person>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers = reader.headers()?.clone();
    let mut missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|h| h == **column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        missing.sort();
        return Err(Error::MissingColumns(missing));
    }

    let mut people = Vec::new();
    for (index, row) in reader.deserialize::<RawPerson>().enumerate() {
        let raw = row?;
        people.push(raw.validate(index + 1)?);
    }
    debug!("Read {} people from CSV", people.len());
    Ok(people)
}

/// Ensure the schema exists, read `source` and upsert its rows.
/// Returns the number of records written.
pub async fn import_file<R: Read + Send>(source: R, conn: &mut SqliteConnection) -> Result<usize> {
    orm::ensure_schema(conn).await?;
    let people = read_csv_as_people(source)?;
    let written = orm::upsert_people(conn, &people).await?;
    info!("Imported {} people", written);
    Ok(written)
}
