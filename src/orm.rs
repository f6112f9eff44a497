//! Data access for the People table (sqlite + sqlx)
//!
//! Every HTTP request gets its own connection through [`RequestConnection`]:
//! opened on first use, reused for the rest of the request and closed when the
//! request is done, whichever way it ends.
//!
//! Usage:
//! let mut conn = orm::connect(&settings.connect_options()).await?;
//! orm::ensure_schema(&mut conn).await?;
//! orm::upsert_people(&mut conn, &people).await?;
use crate::model::Person;
use log::{debug, error, info};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::Connection;

const UPSERT_PERSON: &str = "INSERT INTO People (name, date_of_birth, weight, male)
    VALUES (?, ?, ?, ?)
    ON CONFLICT(name, date_of_birth) DO UPDATE SET
        weight = excluded.weight,
        male = excluded.male";

const SELECT_PEOPLE: &str =
    "SELECT id, name, date_of_birth, weight, male, date_created, date_modified FROM People";

/// A table whose schema can be (re)applied idempotently.
#[async_trait::async_trait]
pub trait Model: Send + Sync {
    fn table_name() -> &'static str;

    /// DDL statements, each safe to run against a database that already has them.
    fn schema() -> &'static [&'static str];

    async fn migrate(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        for statement in Self::schema() {
            execute(conn, statement).await?;
        }
        info!("Table `{}` created or already exists.", Self::table_name());
        Ok(())
    }
}

/// Open a single connection to the database described by `options`.
pub async fn connect(options: &SqliteConnectOptions) -> Result<SqliteConnection, sqlx::Error> {
    let filename = options.get_filename().display().to_string();
    debug!("Connecting to SQLite database at {}", filename);
    match SqliteConnection::connect_with(options).await {
        Ok(conn) => {
            info!("Connection to {} established.", filename);
            Ok(conn)
        }
        Err(e) => {
            error!("Connection to {} failed: {}", filename, e);
            Err(e)
        }
    }
}

/// Execute a single SQL statement, e.g. DDL.
pub async fn execute(conn: &mut SqliteConnection, sql: &str) -> Result<(), sqlx::Error> {
    debug!("Executing SQL: {}", sql);
    let result = sqlx::query(sql).execute(&mut *conn).await;
    if let Err(e) = &result {
        error!("SQL execution failed: {}", e);
    }
    result.map(|_| ())
}

/// Create the People table and its `date_modified` trigger if they are missing.
pub async fn ensure_schema(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    Person::migrate(conn).await
}

/// Insert every person, or update weight and male of the row that already has
/// the same (name, date_of_birth). The batch is committed as one transaction;
/// if any statement fails nothing is written and the error is returned.
pub async fn upsert_people(
    conn: &mut SqliteConnection,
    people: &[Person],
) -> Result<usize, sqlx::Error> {
    if people.is_empty() {
        info!("No people to insert.");
        return Ok(0);
    }

    let mut tx = conn.begin().await?;
    if let Err(e) = write_people(&mut tx, people).await {
        error!("Upsert of {} people failed, rolling back: {}", people.len(), e);
        if let Err(rollback) = tx.rollback().await {
            error!("Rollback failed: {}", rollback);
        }
        return Err(e);
    }
    tx.commit().await?;

    info!("{} people inserted into the table.", people.len());
    Ok(people.len())
}

async fn write_people(conn: &mut SqliteConnection, people: &[Person]) -> Result<(), sqlx::Error> {
    for person in people {
        sqlx::query(UPSERT_PERSON)
            .bind(&person.name)
            .bind(person.date_of_birth)
            .bind(person.weight)
            .bind(person.male)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Every stored person, in storage order.
pub async fn fetch_all_people(conn: &mut SqliteConnection) -> Result<Vec<Person>, sqlx::Error> {
    debug!("Fetching rows with SQL: {}", SELECT_PEOPLE);
    let result = sqlx::query_as::<_, Person>(SELECT_PEOPLE)
        .fetch_all(&mut *conn)
        .await;
    match &result {
        Ok(rows) => info!("Fetched {} people", rows.len()),
        Err(e) => error!("Row fetch failed: {}", e),
    }
    result
}

/// The database handle bound to one HTTP request.
pub struct RequestConnection {
    options: SqliteConnectOptions,
    conn: Option<SqliteConnection>,
}

impl RequestConnection {
    pub fn new(options: SqliteConnectOptions) -> Self {
        RequestConnection {
            options,
            conn: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// The request's connection, opened on the first call.
    pub async fn get(&mut self) -> Result<&mut SqliteConnection, sqlx::Error> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => connect(&self.options).await?,
        };
        Ok(self.conn.insert(conn))
    }

    /// Close the connection, if one was opened.
    pub async fn release(mut self) -> Result<(), sqlx::Error> {
        match self.conn.take() {
            Some(conn) => {
                conn.close().await?;
                info!("Request connection closed.");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for RequestConnection {
    fn drop(&mut self) {
        // Dropping the sqlx connection shuts its worker down and closes the file handle.
        if self.conn.take().is_some() {
            info!("Request connection released.");
        }
    }
}
