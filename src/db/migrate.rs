//! Forward-only schema migrations from `NNN_name.sql` files.
//!
//! Each applied file is recorded with a SHA-256 of its contents. Editing a
//! file after it has been applied is refused rather than silently ignored.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use crate::error::{FraudGraphError, Result};

#[derive(Debug)]
struct SchemaStep {
    version: u32,
    name: String,
    checksum: String,
    sql: String,
}

fn checksum(sql: &str) -> String {
    format!("{:x}", Sha256::digest(sql.as_bytes()))
}

fn ensure_history_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            checksum TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;
    Ok(())
}

/// Names of the applied migrations, oldest first
pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(names)
}

/// "001_graph.sql" -> (1, "001_graph")
fn parse_file_name(file_name: &str) -> Result<(u32, String)> {
    let stem = file_name.strip_suffix(".sql").unwrap_or(file_name);
    let version = stem
        .split_once('_')
        .and_then(|(digits, _)| digits.parse::<u32>().ok())
        .ok_or_else(|| {
            FraudGraphError::Configuration(format!(
                "migration file '{}' must be named NNN_description.sql",
                file_name
            ))
        })?;
    Ok((version, stem.to_string()))
}

fn read_steps(migrations_dir: &Path) -> Result<Vec<SchemaStep>> {
    let entries = fs::read_dir(migrations_dir).map_err(|e| {
        FraudGraphError::Configuration(format!(
            "cannot read migrations directory {}: {}",
            migrations_dir.display(),
            e
        ))
    })?;

    let mut steps = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("sql") {
            continue;
        }
        let file_name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
            FraudGraphError::Configuration(format!("non UTF-8 migration file {}", path.display()))
        })?;
        let (version, name) = parse_file_name(file_name)?;
        let sql = fs::read_to_string(&path)?;

        steps.push(SchemaStep {
            version,
            name,
            checksum: checksum(&sql),
            sql,
        });
    }

    steps.sort_by_key(|step| step.version);
    if let Some(pair) = steps.windows(2).find(|pair| pair[0].version == pair[1].version) {
        return Err(FraudGraphError::Configuration(format!(
            "migrations {} and {} share version {}",
            pair[0].name, pair[1].name, pair[0].version
        )));
    }
    Ok(steps)
}

/// Apply every pending migration, each in its own transaction.
///
/// Fails with `Configuration` when an applied migration no longer matches
/// its file.
pub fn run_migrations(conn: &mut Connection, migrations_dir: &Path) -> Result<()> {
    ensure_history_table(conn)?;

    let mut pending = 0;
    for step in read_steps(migrations_dir)? {
        let recorded: Option<String> = conn
            .query_row(
                "SELECT checksum FROM schema_migrations WHERE version = ?1",
                params![step.version],
                |row| row.get(0),
            )
            .optional()?;

        match recorded {
            Some(recorded) if recorded == step.checksum => continue,
            Some(_) => {
                return Err(FraudGraphError::Configuration(format!(
                    "migration {} was edited after it was applied",
                    step.name
                )));
            }
            None => {}
        }

        log::info!("Applying migration {}", step.name);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(&step.sql)
            .map_err(|e| FraudGraphError::Query(format!("migration {} failed: {}", step.name, e)))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, checksum) VALUES (?1, ?2, ?3)",
            params![step.version, step.name, step.checksum],
        )?;
        tx.commit()?;
        pending += 1;
    }

    if pending == 0 {
        log::debug!("Schema up to date");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
            .unwrap()
    }

    #[test]
    fn test_file_names() {
        assert_eq!(parse_file_name("001_graph.sql").unwrap(), (1, "001_graph".to_string()));
        assert_eq!(
            parse_file_name("012_event_log.sql").unwrap(),
            (12, "012_event_log".to_string())
        );
        assert!(matches!(
            parse_file_name("graph.sql"),
            Err(FraudGraphError::Configuration(_))
        ));
    }

    #[test]
    fn test_steps_ordered_and_non_sql_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("010_later.sql"), "CREATE TABLE later (id INTEGER);").unwrap();
        fs::write(dir.join("002_first.sql"), "CREATE TABLE first (id INTEGER);").unwrap();
        fs::write(dir.join("README.md"), "notes").unwrap();

        let steps = read_steps(dir).unwrap();
        let versions: Vec<u32> = steps.iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![2, 10]);
    }

    #[test]
    fn test_duplicate_versions_rejected() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("001_a.sql"), "SELECT 1;").unwrap();
        fs::write(temp_dir.path().join("001_b.sql"), "SELECT 1;").unwrap();
        assert!(matches!(
            read_steps(temp_dir.path()),
            Err(FraudGraphError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_migrations_dir_is_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();
        let err = run_migrations(&mut conn, &temp_dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, FraudGraphError::Configuration(_)));
    }

    #[test]
    fn test_edited_migration_refused() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("migrations");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("001_t.sql"), "CREATE TABLE t (id INTEGER);").unwrap();

        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();
        run_migrations(&mut conn, &dir).unwrap();

        fs::write(dir.join("001_t.sql"), "CREATE TABLE t (id INTEGER, extra TEXT);").unwrap();
        let err = run_migrations(&mut conn, &dir).unwrap_err();
        assert!(matches!(err, FraudGraphError::Configuration(_)));
    }

    #[test]
    fn test_full_schema_is_rerunnable() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");

        run_migrations(&mut conn, &migrations_dir).unwrap();
        run_migrations(&mut conn, &migrations_dir).unwrap();

        let tables = table_names(&conn);
        for expected in ["checkpoints", "edges", "event_log", "schema_migrations", "vertices"] {
            assert!(tables.contains(&expected.to_string()), "missing table {}", expected);
        }
        assert_eq!(
            get_applied_migrations(&conn).unwrap(),
            vec!["001_graph".to_string(), "002_event_log".to_string()]
        );
    }
}
