use sqlx::sqlite::SqliteConnectOptions;
use std::path::PathBuf;

/// Database file used when nothing else is configured.
pub const DATABASE_FILE: &str = "people.db";

#[derive(Clone, Debug)]
pub struct TemplateSettings {
    pub dir: String,
    pub debug: bool,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub debug: bool,
    pub host: String,
    pub port: u16,
    pub database: PathBuf,
    /// Largest request body the router will buffer, in bytes.
    pub upload_limit: usize,
    pub template: TemplateSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            debug: cfg!(debug_assertions),
            host: "127.0.0.1".to_string(),
            port: 5000,
            database: PathBuf::from(DATABASE_FILE),
            upload_limit: 2 * 1024 * 1024,
            template: TemplateSettings {
                dir: "templates".to_string(),
                debug: false,
            },
        }
    }
}

impl Settings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Options for opening the on-disk store, creating the file on first use.
    pub fn connect_options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.database)
            .create_if_missing(true)
    }
}
