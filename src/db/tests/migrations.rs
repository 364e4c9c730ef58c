use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_new_database_creates_schema() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(db.pool())
            .await
            .unwrap();

    assert!(tables.contains(&"user_usage".to_string()));
    assert!(tables.contains(&"runtime_state".to_string()));
    assert!(tables.contains(&"schema_version".to_string()));

    db.close().await;
}

#[tokio::test]
async fn test_migrations_are_idempotent_across_reopen() {
    let temp_file = NamedTempFile::new().unwrap();

    {
        let db = Database::new(temp_file.path()).await.unwrap();
        db.record_download("alice").await.unwrap();
        db.close().await;
    }

    let db = Database::new(temp_file.path()).await.unwrap();
    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version")
        .fetch_all(db.pool())
        .await
        .unwrap();

    assert_eq!(versions, vec![1, 2], "each migration must be recorded exactly once");
    assert_eq!(db.get_usage("alice").await.unwrap(), 1, "reopen must keep data");

    db.close().await;
}

#[tokio::test]
async fn test_new_creates_missing_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("state").join("relay.db");

    let db = Database::new(&path).await.unwrap();
    assert!(path.exists(), "database file should be created");

    db.close().await;
}
