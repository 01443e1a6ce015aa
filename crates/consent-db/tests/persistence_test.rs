//! Store behaviour across separate runs sharing one database file.

use consent_core::{CmpType, ConsentStatus, CrawlResult, CrawlStatus};
use consent_db::{crawl_results, Database, RunStatus};
use std::time::Duration;

fn crash_result(domain: &str) -> CrawlResult {
    CrawlResult {
        domain: domain.to_string(),
        url: format!("https://{domain}/"),
        status: CrawlStatus::BrowserCrash,
        cmp_type: None,
        cookies_collected_count: 0,
        consent_status: ConsentStatus::NotApplicable,
        duration: Duration::from_millis(10),
        error_message: Some("browser process died".to_string()),
    }
}

#[tokio::test]
async fn test_crawl_ids_strictly_increase_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("consent_crawl.sqlite");

    let mut ids = Vec::new();
    for _ in 0..2 {
        let db = Database::open(&path).await.expect("open database");
        let run = db.create_run("consent", 2).await.expect("create run");
        for domain in ["a.test", "b.test"] {
            let id = db
                .record_crawl(&run.id, &crash_result(domain), &[], &[])
                .await
                .expect("record crawl");
            ids.push(id);
        }
        db.complete_run(&run.id, RunStatus::Completed, 2, 2, 0)
            .await
            .expect("complete run");
        db.close().await;
    }

    assert_eq!(ids.len(), 4);
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids: {ids:?}");
}

#[tokio::test]
async fn test_concurrent_writers_do_not_interleave() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::open(dir.path().join("consent_crawl.sqlite"))
        .await
        .expect("open database");
    let run = db.create_run("consent", 16).await.expect("create run");

    let mut handles = Vec::new();
    for i in 0..16 {
        let db = db.clone();
        let run_id = run.id.clone();
        handles.push(tokio::spawn(async move {
            let domain = format!("site{i}.test");
            let mut result = crash_result(&domain);
            result.status = CrawlStatus::Success;
            result.cmp_type = Some(CmpType::Termly);
            db.record_crawl(&run_id, &result, &[], &[]).await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("record crawl");
    }

    let rows = crawl_results::get_by_run(db.pool(), &run.id)
        .await
        .expect("rows");
    assert_eq!(rows.len(), 16);

    let stats = db.crawl_statistics(&run.id).await.expect("stats");
    assert_eq!(stats.total, 16);
    assert_eq!(stats.by_cmp.get("termly"), Some(&16));
}
