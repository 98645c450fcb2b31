use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;

use crate::TargetError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
    SqlServer,
    Oracle,
}

impl Dialect {
    /// Dialect named by a connection string's scheme, ignoring any `+driver` suffix.
    pub fn detect(connection_string: &str) -> Option<Self> {
        let (scheme, _) = split_scheme(connection_string)?;
        Self::from_scheme(scheme)
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        let base = scheme.split('+').next().unwrap_or(scheme);
        match base.to_ascii_lowercase().as_str() {
            "sqlite" => Some(Dialect::Sqlite),
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "mysql" | "mariadb" => Some(Dialect::MySql),
            "mssql" | "sqlserver" => Some(Dialect::SqlServer),
            "oracle" => Some(Dialect::Oracle),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgresql",
            Dialect::MySql => "mysql",
            Dialect::SqlServer => "sqlserver",
            Dialect::Oracle => "oracle",
        }
    }

    /// Case-insensitive form of `column = '<literal>'`, when the dialect has one
    /// that differs from plain equality. `literal` must already be lowercase.
    pub fn case_insensitive_eq(self, column: &str, literal: &str) -> Option<String> {
        match self {
            Dialect::Sqlite => Some(format!("{} = '{}' COLLATE NOCASE", column, literal)),
            Dialect::Postgres => Some(format!("{} ILIKE '{}'", column, literal)),
            Dialect::Oracle => Some(format!("LOWER({}) = '{}'", column, literal)),
            // default collations already compare case-insensitively
            Dialect::MySql | Dialect::SqlServer => None,
        }
    }
}

/// A connection string this crate can open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetDsn {
    SqliteMemory,
    SqliteFile(PathBuf),
    /// `postgres://` URL with any `+driver` suffix dropped.
    Postgres(String),
}

impl TargetDsn {
    /// Accepts SQLAlchemy-style URLs. For SQLite: `sqlite://` and
    /// `sqlite::memory:` for an in-memory database, `sqlite:///relative.db`
    /// and `sqlite:////absolute/path.db` for files. For Postgres:
    /// `postgres://` or `postgresql[+driver]://user:pass@host:port/db`.
    pub fn parse(connection_string: &str) -> Result<Self, TargetError> {
        let (scheme, rest) = split_scheme(connection_string).ok_or_else(|| {
            TargetError::InvalidConnectionString("missing scheme".to_string())
        })?;
        match Dialect::from_scheme(scheme) {
            Some(Dialect::Sqlite) => {}
            Some(Dialect::Postgres) => return Self::postgres(connection_string, rest),
            Some(other) => return Err(TargetError::UnsupportedDialect(other.as_str().into())),
            None => return Err(TargetError::UnsupportedDialect(scheme.to_string())),
        }
        let rest = rest.split('?').next().unwrap_or_default();
        let path = rest.strip_prefix('/').unwrap_or(rest);
        if path.is_empty() || path == ":memory:" {
            return Ok(TargetDsn::SqliteMemory);
        }
        Ok(TargetDsn::SqliteFile(PathBuf::from(path)))
    }

    fn postgres(connection_string: &str, rest: &str) -> Result<Self, TargetError> {
        let Some((_, authority)) = connection_string.trim().split_once("://") else {
            return Err(TargetError::InvalidConnectionString(
                "postgres URLs need a `://` authority".to_string(),
            ));
        };
        if authority.is_empty() || rest.is_empty() {
            return Err(TargetError::InvalidConnectionString(
                "postgres URL without host".to_string(),
            ));
        }
        Ok(TargetDsn::Postgres(format!("postgres://{}", authority)))
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            TargetDsn::SqliteMemory | TargetDsn::SqliteFile(_) => Dialect::Sqlite,
            TargetDsn::Postgres(_) => Dialect::Postgres,
        }
    }

    pub fn database_name(&self) -> String {
        match self {
            TargetDsn::SqliteMemory => "main".to_string(),
            TargetDsn::SqliteFile(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "main".to_string()),
            TargetDsn::Postgres(url) => url
                .split('?')
                .next()
                .and_then(|u| u.trim_start_matches("postgres://").split_once('/'))
                .map(|(_, db)| db.to_string())
                .filter(|db| !db.is_empty())
                .unwrap_or_else(|| "postgres".to_string()),
        }
    }

    /// Open a SQLite connection. Files are never created; a missing file is
    /// an error.
    pub(crate) fn open_sqlite(&self, read_only: bool) -> Result<Connection, TargetError> {
        let conn = match self {
            // nothing persists past the connection, so read-only adds nothing
            TargetDsn::SqliteMemory => Connection::open_in_memory()?,
            TargetDsn::SqliteFile(path) => {
                let mode = if read_only {
                    OpenFlags::SQLITE_OPEN_READ_ONLY
                } else {
                    OpenFlags::SQLITE_OPEN_READ_WRITE
                };
                Connection::open_with_flags(
                    path,
                    mode | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
                )?
            }
            TargetDsn::Postgres(_) => {
                return Err(TargetError::UnsupportedDialect(
                    "postgresql has no blocking driver".to_string(),
                ))
            }
        };
        Ok(conn)
    }
}

fn split_scheme(connection_string: &str) -> Option<(&str, &str)> {
    let trimmed = connection_string.trim();
    let (scheme, rest) = trimmed
        .split_once("://")
        .or_else(|| trimmed.split_once(':'))?;
    if scheme.is_empty() {
        return None;
    }
    Some((scheme, rest))
}
