//! Loading settings from a TOML file and opening the configured database.

#![cfg(feature = "sqlite")]

use relquery::sqlite::SqliteExecutor;
use relquery::{Database, FieldKind, Settings};
use sea_query::Value;
use std::fs;

#[test]
fn loads_file_and_opens_database() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("shop.db");

    let seed = SqliteExecutor::open(&db_path).unwrap();
    seed.execute_batch(
        "CREATE TABLE `tag` (`id` INTEGER PRIMARY KEY, `name` TEXT NOT NULL);
         INSERT INTO `tag` VALUES (1, 'rust'), (2, 'sql');",
    )
    .unwrap();
    drop(seed);

    let config_path = dir.path().join("config.toml");
    fs::write(
        &config_path,
        format!(
            r#"
[database]
path = "{}"
busy_timeout_ms = 100

[query]
key_by_id = false

[[entities]]
name = "tag"
fields = [{{ name = "id", kind = "integer" }}, {{ name = "name", kind = "text" }}]
"#,
            db_path.display().to_string().replace('\\', "/")
        ),
    )
    .unwrap();

    let settings = Settings::load_from(&config_path).unwrap();
    assert_eq!(settings.database.busy_timeout_ms, 100);
    assert!(!settings.query.key_by_id);
    assert_eq!(
        settings.schema().entity("tag").and_then(|tag| tag.field_kind("id")),
        Some(FieldKind::Integer)
    );

    let db = Database::open(&settings).unwrap();
    let tags = db.select("tag").unwrap().fetch_all_default().unwrap();
    assert!(!tags.is_keyed_by_id());
    assert_eq!(tags.len(), 2);
    assert_eq!(tags.first().unwrap().get("name"), Some(&Value::from("rust")));
}

#[test]
fn unreadable_file_falls_back_to_environment() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    fs::write(&config_path, "[database\npath = ").unwrap();

    let settings = Settings::load_from(&config_path).unwrap();
    assert_eq!(settings.database.path, ":memory:");
}
