//! Connection handling for PostgreSQL.
//!
//! Connections are acquired per operation from explicit settings and passed
//! by handle into the pipeline or dispatcher; nothing here is global state.
//! The password is never persisted: it comes from a flag or the standard
//! `PGPASSWORD` environment variable.

use std::env;

use anyhow::{Context, Result};
use postgres::{Client, Config, NoTls};

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub dbname: String,
}

impl ConnectionSettings {
    pub fn connect(&self) -> Result<Client> {
        let mut config = Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .dbname(&self.dbname);
        let password = self
            .password
            .clone()
            .or_else(|| env::var("PGPASSWORD").ok());
        if let Some(password) = password {
            config.password(&password);
        }
        config.connect(NoTls).with_context(|| {
            format!(
                "Connecting to postgres://{}@{}:{}/{}",
                self.user, self.host, self.port, self.dbname
            )
        })
    }
}

/// Renders a database error with SQLSTATE-aware detail so cast failures and
/// constraint violations read as actionable messages.
pub fn describe_db_error(error: &postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let mut message = db_error.message().to_string();
    if let Some(detail) = db_error.detail()
        && !detail.trim().is_empty()
    {
        message.push_str(&format!(" (detail: {detail})"));
    }
    if let Some(column) = db_error.column()
        && !column.trim().is_empty()
    {
        message.push_str(&format!(" (column: {column})"));
    }

    match db_error.code().code() {
        "23505" => format!("duplicate value violates unique constraint: {message}"),
        "23502" => format!("null value violates not-null constraint: {message}"),
        "22007" => format!("invalid datetime format: {message}"),
        "22P02" => format!("invalid input syntax for target type: {message}"),
        "42P01" => format!("relation does not exist: {message}"),
        "42703" => format!("column does not exist: {message}"),
        code => format!("{message} (code: {code})"),
    }
}
