//! End-to-end pipeline runs against the SQLite store.

use content_intake::config::Config;
use content_intake::sqlite_store::SqliteStore;
use content_intake::{db, migrate};
use content_intake_core::identity::IdentityResolver;
use content_intake_core::models::{CandidateItem, ContentKind, PublishTarget};
use content_intake_core::publish::PublicationCoordinator;
use content_intake_core::staging::{StagedFilter, StagingRepository};
use tempfile::TempDir;

fn test_config(tmp: &TempDir) -> Config {
    let db_path = tmp.path().join("data").join("intake.sqlite");
    let config_content = format!(
        r#"
[db]
path = "{}"

[admin]
email = "admin@example.com"
"#,
        db_path.display()
    );
    toml::from_str(&config_content).unwrap()
}

async fn store(tmp: &TempDir) -> SqliteStore {
    let cfg = test_config(tmp);
    migrate::run_migrations(&cfg).await.unwrap();
    SqliteStore::new(db::connect(&cfg).await.unwrap())
}

fn news(title: &str, url: &str) -> CandidateItem {
    let mut c = CandidateItem::new(ContentKind::News, title);
    c.source_url = Some(url.to_string());
    c
}

fn case(author: &str, title: &str) -> CandidateItem {
    let mut c = CandidateItem::new(ContentKind::Case, title);
    c.author_name = Some(author.to_string());
    c
}

#[tokio::test]
async fn test_url_identity_ignores_title_changes() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp).await;
    StagingRepository::new(&store)
        .save_accepted(vec![news("Original", "https://news.example.com/a/12345")], "admin")
        .await
        .unwrap();

    let annotated = IdentityResolver::new(&store)
        .annotate(vec![news("Edited headline", "https://news.example.com/a/12345")])
        .await
        .unwrap();
    assert_eq!(annotated[0].external_id, "12345");
    assert!(annotated[0].is_duplicate);
}

#[tokio::test]
async fn test_mixed_batch_publish_reports_counts() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp).await;
    let staging = StagingRepository::new(&store);
    let report = staging
        .save_accepted(
            vec![
                case("Kim", "Report bot"),
                case("Lee", "Meeting notes"),
                case("Park", "Slide maker"),
            ],
            "admin",
        )
        .await
        .unwrap();
    assert_eq!(report.succeeded, 3);

    let rows = staging.list_staged(&StagedFilter::default()).await.unwrap();
    let ids: Vec<String> = rows.iter().map(|r| r.record.id.clone()).collect();

    let coordinator = PublicationCoordinator::new(&store);
    coordinator
        .publish_staged(vec![ids[0].clone()], PublishTarget::Cases, "admin")
        .await
        .unwrap();

    let report = coordinator
        .publish_staged(ids.clone(), PublishTarget::Cases, "admin")
        .await
        .unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"success": true, "total": 3, "published": 2, "skipped": 1})
    );

    let published = staging
        .list_staged(&StagedFilter {
            published: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(published.len(), 3);
}

#[tokio::test]
async fn test_staged_duplicates_flagged_on_read() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp).await;

    // Two ingestion runs that both saw the item before either wrote it
    let staging = StagingRepository::new(&store);
    staging
        .save_accepted(vec![case("Kim", "Report bot")], "admin")
        .await
        .unwrap();
    let copy = content_intake_core::models::StagedRecord::from_candidate(
        case("Kim", "Report bot"),
        "kim_report_bot".into(),
        "admin",
    );
    content_intake_core::store::Store::insert_staged(&store, &copy)
        .await
        .unwrap();

    let rows = staging.list_staged(&StagedFilter::default()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.iter().filter(|r| r.is_duplicate).count(), 1);
}
