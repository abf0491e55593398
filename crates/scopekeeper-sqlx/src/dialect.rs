//! Database dialect detection from connection URLs
//!
//! URLs may carry a driver qualifier in their scheme, e.g.
//! `postgresql+asyncpg://host/db`. The dialect is the part before the `+`,
//! the driver is the part after it. sqlx picks its own driver from the
//! dialect, so the qualifier is stripped before connecting.

use scopekeeper_core::{Error, Result};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Dialect {
    name: String,
    driver: Option<String>,
}

impl Dialect {
    /// Parse the dialect out of a connection URL without connecting.
    ///
    /// # Errors
    /// - `Error::InvalidUrl` if the URL has no scheme or the scheme is malformed
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, _) = split_scheme(url)?;

        let (name, driver) = match scheme.split_once('+') {
            Some((name, driver)) => (name, Some(driver)),
            None => (scheme, None),
        };

        if name.is_empty() {
            return Err(Error::InvalidUrl(format!("Missing dialect in '{}'", url)));
        }
        if driver.is_some_and(str::is_empty) {
            return Err(Error::InvalidUrl(format!(
                "Empty driver qualifier in '{}'",
                url
            )));
        }

        Ok(Self {
            name: name.to_string(),
            driver: driver.map(str::to_string),
        })
    }

    /// Dialect name, e.g. `postgresql` or `sqlite`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Driver qualifier, e.g. `asyncpg` in `postgresql+asyncpg://`
    pub fn driver(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    // Predicates ignore case; `name()` keeps the URL's spelling.
    pub fn is_sqlite(&self) -> bool {
        self.name.eq_ignore_ascii_case("sqlite")
    }

    pub fn is_postgres(&self) -> bool {
        ["postgresql", "postgres"]
            .iter()
            .any(|name| self.name.eq_ignore_ascii_case(name))
    }

    pub fn is_mysql(&self) -> bool {
        ["mysql", "mariadb"]
            .iter()
            .any(|name| self.name.eq_ignore_ascii_case(name))
    }

    /// Query counting tables with a given name, bound as the only parameter
    pub(crate) fn table_exists_sql(&self) -> Result<&'static str> {
        if self.is_sqlite() {
            Ok("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
        } else if self.is_postgres() {
            Ok("SELECT COUNT(*) FROM information_schema.tables \
                WHERE table_schema = current_schema() AND table_name = $1")
        } else if self.is_mysql() {
            Ok("SELECT COUNT(*) FROM information_schema.tables \
                WHERE table_schema = DATABASE() AND table_name = ?")
        } else {
            Err(Error::Schema(format!(
                "Don't know how to inspect tables for dialect '{}'",
                self.name
            )))
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.driver {
            Some(driver) => write!(f, "{}+{}", self.name, driver),
            None => f.write_str(&self.name),
        }
    }
}

/// The URL sqlx should connect to: same URL with the driver qualifier removed
pub fn connect_url(url: &str) -> Result<String> {
    let (scheme, rest) = split_scheme(url)?;
    let dialect = scheme.split_once('+').map_or(scheme, |(name, _)| name);
    Ok(format!("{}{}", dialect.to_ascii_lowercase(), rest))
}

/// Split `url` into its scheme and everything from the first `:` on
fn split_scheme(url: &str) -> Result<(&str, &str)> {
    let url = url.trim();
    let Some(colon) = url.find(':') else {
        return Err(Error::InvalidUrl(format!("Missing scheme in '{}'", url)));
    };

    let scheme = &url[..colon];
    let well_formed = scheme
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    if !well_formed {
        return Err(Error::InvalidUrl(format!("Malformed scheme in '{}'", url)));
    }

    Ok((scheme, &url[colon..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_with_driver_qualifier() {
        let dialect = Dialect::parse("postgresql+asyncpg://host/db").unwrap();
        assert_eq!(dialect.name(), "postgresql");
        assert_eq!(dialect.driver(), Some("asyncpg"));
        assert!(dialect.is_postgres());
        assert_eq!(dialect.to_string(), "postgresql+asyncpg");
    }

    #[test]
    fn test_dialect_without_driver_qualifier() {
        let dialect = Dialect::parse("sqlite:///x.db").unwrap();
        assert_eq!(dialect.name(), "sqlite");
        assert_eq!(dialect.driver(), None);
        assert!(dialect.is_sqlite());
    }

    #[test]
    fn test_dialect_keeps_case() {
        let dialect = Dialect::parse("MySQL+aiomysql://host/db").unwrap();
        assert_eq!(dialect.name(), "MySQL");
        assert_eq!(dialect.driver(), Some("aiomysql"));
        assert!(dialect.is_mysql());
    }

    #[test]
    fn test_invalid_urls() {
        for url in ["", "no-scheme-here", "://host/db", "+asyncpg://host", "1pg://host", "pg+://h"] {
            assert!(
                matches!(Dialect::parse(url), Err(Error::InvalidUrl(_))),
                "expected '{}' to be rejected",
                url
            );
        }
    }

    #[test]
    fn test_connect_url_strips_driver() {
        assert_eq!(
            connect_url("postgresql+asyncpg://user@host:5432/db").unwrap(),
            "postgresql://user@host:5432/db"
        );
        assert_eq!(
            connect_url("sqlite+aiosqlite:///tmp/x.db").unwrap(),
            "sqlite:///tmp/x.db"
        );
        assert_eq!(
            connect_url("sqlite://app.db?mode=rwc").unwrap(),
            "sqlite://app.db?mode=rwc"
        );
    }

    #[test]
    fn test_table_exists_sql_per_dialect() {
        let sqlite = Dialect::parse("sqlite://x.db").unwrap();
        assert!(sqlite.table_exists_sql().unwrap().contains("sqlite_master"));

        let postgres = Dialect::parse("postgres://h/db").unwrap();
        assert!(postgres.table_exists_sql().unwrap().contains("$1"));

        let unknown = Dialect::parse("oracle://h/db").unwrap();
        assert!(matches!(unknown.table_exists_sql(), Err(Error::Schema(_))));
    }
}
