use super::*;
use tempfile::TempDir;

#[tokio::test]
async fn insert_reports_first_sighting_only() {
    let dir = TempDir::new().expect("temp dir");
    let seen = SeenSet::open(dir.path()).await.expect("open");

    assert!(seen.insert("Hello").await.expect("insert"));
    assert!(!seen.insert("Hello").await.expect("insert again"));
    assert!(seen.insert("hello").await.expect("case differs"));

    assert!(seen.contains("Hello").await.expect("contains"));
    assert!(!seen.contains("Bye").await.expect("contains"));
    assert_eq!(seen.len().await.expect("len"), 2);
}

#[tokio::test]
async fn entries_persist_until_cleared() {
    let dir = TempDir::new().expect("temp dir");

    let seen = SeenSet::open(dir.path()).await.expect("open");
    seen.insert("kept").await.expect("insert");
    seen.close().await;

    let reopened = SeenSet::open(dir.path()).await.expect("reopen");
    assert_eq!(reopened.path(), SeenSet::path_for(dir.path()).as_path());
    assert!(reopened.contains("kept").await.expect("contains"));

    reopened.clear().await.expect("clear");
    assert!(reopened.is_empty().await.expect("is_empty"));
}
