//! End-to-end batch workflow: input file → provider → store → export

use std::sync::{Arc, Mutex};
use std::time::Duration;

use gmna_ba::db::{init_memory_pool, AuditStore, SqliteAuditStore};
use gmna_ba::models::{BackupType, BatchOutcome};
use gmna_ba::services::export::{self, ExportFormat};
use gmna_ba::services::{input_parser, BatchController, LocalBackupLog, OpenAiAuditor, PersistenceService};
use gmna_ba::utils::RetryPolicy;
use gmna_common::config::OpenAiSettings;
use gmna_common::events::{BatchProgress, BatchStatus};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(overall: u32) -> serde_json::Value {
    let content = json!({
        "has_gmn_profile": true,
        "verification_status": "Verificado",
        "nap_consistency_score": 80,
        "images_count": 12,
        "rating": 4.6,
        "total_reviews": 58,
        "seo_score": 70,
        "engagement_score": 65,
        "overall_score": overall,
        "improvement_points": ["Publicar semanalmente", "Adicionar produtos"],
        "should_invite_for_optimization": false
    })
    .to_string();

    json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
}

#[tokio::test]
async fn test_file_to_stored_audit_with_one_provider_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("EMPRESA: Loja B"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(90)))
        .mount(&server)
        .await;

    let input = "Empresa,Cidade,UF,Categoria\nLoja A,Curitiba,PR,Livrarias\nLoja B,Curitiba,PR,Livrarias\nLoja C,Curitiba,PR,Livrarias\n";
    let parsed = input_parser::parse_file("lista.csv", input.as_bytes()).unwrap();
    assert_eq!(parsed.records.len(), 3);

    let auditor = OpenAiAuditor::new(
        Some("sk-test".into()),
        OpenAiSettings {
            base_url: server.uri(),
            ..Default::default()
        },
    )
    .unwrap();

    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteAuditStore::new(init_memory_pool().await.unwrap()));
    let persistence = Arc::new(PersistenceService::new(
        store.clone(),
        LocalBackupLog::new(dir.path(), 10),
        RetryPolicy::linear(3, Duration::from_millis(1)),
    ));
    let controller =
        BatchController::new(Arc::new(auditor), persistence, Duration::from_millis(10));

    let progress = Mutex::new(Vec::new());
    let observer = |p: &BatchProgress| progress.lock().unwrap().push((p.current, p.status));

    let report = controller
        .run(&parsed.records, Some("acme".into()), &observer, &CancellationToken::new())
        .await;

    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.results[0].overall_score(), 90.0);
    assert!(report.results[1].is_error_placeholder());
    assert_eq!(report.results[2].overall_score(), 90.0);
    assert_eq!(
        *progress.lock().unwrap(),
        vec![
            (1, BatchStatus::Processing),
            (2, BatchStatus::Processing),
            (3, BatchStatus::Processing),
            (3, BatchStatus::Completed),
        ]
    );

    let audit_id = report.persistence.audit_id().expect("stored");
    let detail = store.load_audit(audit_id).await.unwrap().unwrap();
    assert_eq!(detail.audit.aggregate.segment, "Livrarias");
    assert_eq!(detail.audit.aggregate.state.as_deref(), Some("PR"));
    assert_eq!(detail.audit.aggregate.overall_score, 60);
    assert_eq!(detail.audit.aggregate.companies_analyzed, 3);
    // Best score first, placeholder last
    assert_eq!(detail.companies[2].name(), "Loja B");

    let backups = store.list_backups(10).await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].backup_type, BackupType::Full);
    assert_eq!(backups[0].metadata.record_count, 3);

    let csv = export::export(&report.results, ExportFormat::Csv).unwrap();
    let mut reader = csv::Reader::from_reader(csv.as_slice());
    assert_eq!(reader.records().count(), 3);
}
