use anyhow::{bail, Context, Result};
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use std::path::Path;
use tracing::info;

/// Offset added to schema versions before they are written to `PRAGMA user_version`,
/// so a database created by another tool is never mistaken for one of ours.
pub const BASE_DB_VERSION: usize = 99999;

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                default_value: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
        }
    }

    fn parse(s: &str) -> Option<&'static SqlType> {
        match s {
            "TEXT" => Some(&SqlType::Text),
            "INTEGER" => Some(&SqlType::Integer),
            "REAL" => Some(&SqlType::Real),
            _ => None,
        }
    }
}

pub struct Column<'a, S: AsRef<str>> {
    pub name: S,
    pub sql_type: &'a SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<S>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column<'static, &'static str>],
    /// Composite primary key. When set, no column may carry `is_primary_key`.
    pub primary_key: &'static [&'static str],
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    pub fn create_sql(&self) -> String {
        let mut create_sql = format!("CREATE TABLE {} (", self.name);
        for (column_index, column) in self.columns.iter().enumerate() {
            if column_index > 0 {
                create_sql.push_str(", ");
            }
            create_sql.push_str(&format!("{} {}", column.name, column.sql_type.as_sql()));
            if column.is_primary_key {
                create_sql.push_str(" PRIMARY KEY");
            }
            if column.non_null {
                create_sql.push_str(" NOT NULL");
            }
            if let Some(default_value) = column.default_value {
                create_sql.push_str(&format!(" DEFAULT {}", default_value));
            }
        }
        if !self.primary_key.is_empty() {
            create_sql.push_str(&format!(", PRIMARY KEY ({})", self.primary_key.join(", ")));
        }
        for unique_constraint in self.unique_constraints {
            create_sql.push_str(&format!(", UNIQUE ({})", unique_constraint.join(", ")));
        }
        create_sql.push_str(");");
        create_sql
    }

    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute(&self.create_sql(), params![])?;

        for (index_name, column_name) in self.indices {
            conn.execute(
                &format!(
                    "CREATE INDEX {} ON {}({});",
                    index_name, self.name, column_name
                ),
                params![],
            )?;
        }
        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

/// SQLite reports defaults the way they were written, sometimes wrapped in parentheses.
fn normalize_default(value: &str) -> &str {
    value
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .unwrap_or(value)
}

/// Columns of `table` as SQLite reports them, in declaration order.
fn read_columns(conn: &Connection, table: &str) -> Result<Vec<Column<'static, String>>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| {
            let declared: String = row.get(2)?;
            let sql_type = SqlType::parse(&declared)
                .ok_or_else(|| rusqlite::Error::InvalidColumnType(2, declared, Type::Text))?;
            Ok(Column {
                name: row.get(1)?,
                sql_type,
                non_null: row.get::<_, i32>(3)? == 1,
                default_value: row.get(4)?,
                is_primary_key: row.get::<_, i32>(5)? > 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("Failed to read columns of table {table}"))?;
    Ok(columns)
}

/// Sorted column sets of every unique index on `table`.
fn read_unique_column_sets(conn: &Connection, table: &str) -> Result<Vec<Vec<String>>> {
    let mut list = conn.prepare(&format!("PRAGMA index_list({table})"))?;
    let unique_indices = list
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i32>(2)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .filter(|(_, unique)| *unique == 1)
        .map(|(name, _)| name);

    let mut sets = Vec::new();
    for index in unique_indices {
        let mut info = conn.prepare(&format!("PRAGMA index_info({index})"))?;
        let mut columns = info
            .query_map([], |row| row.get::<_, String>(2))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        columns.sort();
        sets.push(columns);
    }
    Ok(sets)
}

impl Table {
    fn validate(&self, conn: &Connection) -> Result<()> {
        let actual = read_columns(conn, self.name)?;
        if actual.is_empty() {
            bail!("Table {} does not exist", self.name);
        }
        if actual.len() != self.columns.len() {
            let found: Vec<_> = actual.iter().map(|c| c.name.as_str()).collect();
            let wanted: Vec<_> = self.columns.iter().map(|c| c.name).collect();
            bail!(
                "Table {} has columns [{}], expected [{}]",
                self.name,
                found.join(", "),
                wanted.join(", ")
            );
        }

        for (found, wanted) in actual.iter().zip(self.columns) {
            let wanted_pk = wanted.is_primary_key || self.primary_key.contains(&wanted.name);
            let mismatch = if found.name != wanted.name {
                Some(format!("found column {} in its place", found.name))
            } else if found.sql_type != wanted.sql_type {
                Some(format!("type is {:?}, expected {:?}", found.sql_type, wanted.sql_type))
            } else if found.non_null != wanted.non_null {
                Some(format!("NOT NULL is {}, expected {}", found.non_null, wanted.non_null))
            } else if found.default_value.as_deref().map(normalize_default)
                != wanted.default_value.map(normalize_default)
            {
                Some(format!(
                    "default is {:?}, expected {:?}",
                    found.default_value, wanted.default_value
                ))
            } else if found.is_primary_key != wanted_pk {
                Some(format!(
                    "primary key is {}, expected {}",
                    found.is_primary_key, wanted_pk
                ))
            } else {
                None
            };
            if let Some(mismatch) = mismatch {
                bail!("Table {} column {}: {}", self.name, wanted.name, mismatch);
            }
        }

        for (index_name, _) in self.indices {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1 AND tbl_name = ?2",
                    params![index_name, self.name],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !exists {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }

        if self.unique_constraints.is_empty() {
            return Ok(());
        }
        let unique_sets = read_unique_column_sets(conn, self.name)?;
        for constraint in self.unique_constraints {
            let mut wanted: Vec<&str> = constraint.to_vec();
            wanted.sort();
            let present = unique_sets
                .iter()
                .any(|set| set.iter().map(String::as_str).eq(wanted.iter().copied()));
            if !present {
                bail!(
                    "Table {} is missing unique constraint on columns ({})",
                    self.name,
                    constraint.join(", ")
                );
            }
        }
        Ok(())
    }
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    /// Check that every table matches its definition, including indices and
    /// unique constraints.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

/// Open (or create) a SQLite database managed by `schemas`.
///
/// A missing file is created with the latest schema and `on_create` is invoked on it.
/// An existing file is validated against the schema matching its recorded version and
/// then migrated forward inside a single transaction.
pub fn open_versioned_database(
    path: &Path,
    schemas: &'static [VersionedSchema],
    label: &str,
    on_create: Option<fn(&Connection) -> Result<()>>,
) -> Result<Connection> {
    let latest = schemas
        .last()
        .with_context(|| format!("No schema defined for the {} database", label))?;
    let is_new_db = !path.exists();

    let mut conn = Connection::open(path)
        .with_context(|| format!("Failed to open {} database at {:?}", label, path))?;
    conn.execute("PRAGMA foreign_keys = ON;", [])?;

    if is_new_db {
        info!("Creating new {} database at {:?}", label, path);
        let tx = conn.transaction()?;
        latest.create(&tx)?;
        if let Some(seed) = on_create {
            seed(&tx).with_context(|| format!("Failed to seed {} database", label))?;
        }
        tx.commit()?;
        return Ok(conn);
    }

    let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let db_version = raw_version - BASE_DB_VERSION as i64;
    if db_version < 1 {
        bail!(
            "{} database version {} is invalid (expected >= 1)",
            label,
            db_version
        );
    }

    let version_index = schemas
        .iter()
        .position(|s| s.version == db_version as usize)
        .with_context(|| format!("Unknown {} database version {}", label, db_version))?;
    schemas[version_index].validate(&conn).with_context(|| {
        format!(
            "{} database schema validation failed for version {}",
            label, db_version
        )
    })?;

    if (db_version as usize) < latest.version {
        info!(
            "Migrating {} database from version {} to {}",
            label, db_version, latest.version
        );
        let tx = conn.transaction()?;
        let mut latest_from = db_version as usize;
        for schema in schemas.iter().filter(|s| s.version > db_version as usize) {
            if let Some(migration_fn) = schema.migration {
                migration_fn(&tx).with_context(|| {
                    format!("Failed to run {} migration to version {}", label, schema.version)
                })?;
            }
            latest_from = schema.version;
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
            [],
        )?;
        tx.commit()?;
    }

    Ok(conn)
}
