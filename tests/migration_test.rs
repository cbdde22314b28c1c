mod helpers;

use memory_engine::db;
use memory_engine::db::migrations::{get_embedding_model, get_schema_version, run_migrations, CURRENT_SCHEMA_VERSION};

#[test]
fn fresh_db_migrates_to_current_version() {
    let conn = helpers::test_db();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn migration_reserves_embedding_model_key() {
    let conn = helpers::test_db();
    let model = get_embedding_model(&conn).unwrap();
    assert_eq!(model, Some(String::new()));
}

#[test]
fn migrations_are_idempotent() {
    let conn = helpers::test_db();
    run_migrations(&conn).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn manual_v1_db_upgrades_correctly() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    db::schema::init_schema(&conn).unwrap();

    assert_eq!(get_schema_version(&conn).unwrap(), 1);
    assert!(get_embedding_model(&conn).unwrap().is_none());

    run_migrations(&conn).unwrap();

    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    assert!(get_embedding_model(&conn).unwrap().is_some());
}
