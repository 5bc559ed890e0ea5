//! Feishu Integration Tests
//!
//! Drives the real HTTP transport against a local mock server. The mock
//! server lives on a tokio runtime; the blocking client is called from the
//! test thread.

use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::runtime::Runtime;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use larkflow::analysis::SimulatedAnalyzer;
use larkflow::core::{keys, Config, CredentialStore, Settings};
use larkflow::integrations::{self, BitableClient, DocxClient, FeishuError, Identity};
use larkflow::report::{DocumentPublisher, ResultsArchive};
use larkflow::workflow::{BitableTaskStore, Orchestrator, RunOptions, StatusLabels, TaskStatus};

const APP_TOKEN_PATH: &str = "/open-apis/auth/v3/app_access_token/internal/";
const REFRESH_PATH: &str = "/open-apis/authen/v1/refresh_access_token";
const RECORDS_PATH: &str = "/open-apis/bitable/v1/apps/bascn1/tables/tbl1/records";

// ============================================================================
// Fixtures
// ============================================================================

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap()
}

fn config_for(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.feishu.base_url = format!("{}/open-apis", server.uri());
    config.feishu.timeout_secs = 5;
    config.feishu.max_attempts = 2;
    config.feishu.retry_delay_ms = 10;
    config.table.app_token = Some("bascn1".to_string());
    config.table.table_id = Some("tbl1".to_string());
    config
}

fn settings(config: Config, store: CredentialStore) -> Settings {
    Settings::resolve(config, store).unwrap()
}

fn app_store() -> CredentialStore {
    CredentialStore::in_memory([(keys::APP_ID, "cli_test"), (keys::APP_SECRET, "secret")])
}

fn app_token_response(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "code": 0,
        "msg": "ok",
        "app_access_token": token,
        "expire": 7200
    }))
}

fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "msg": "success", "data": data }))
}

fn requests_to(rt: &Runtime, server: &MockServer, wanted: &str) -> Vec<wiremock::Request> {
    rt.block_on(server.received_requests())
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == wanted)
        .collect()
}

// ============================================================================
// Token Tests
// ============================================================================

#[test]
fn test_app_token_is_issued_once_and_sent_as_bearer() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(async {
        Mock::given(method("POST"))
            .and(path(APP_TOKEN_PATH))
            .and(body_partial_json(json!({ "app_id": "cli_test", "app_secret": "secret" })))
            .respond_with(app_token_response("t-app-123456789"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(RECORDS_PATH))
            .and(header("Authorization", "Bearer t-app-123456789"))
            .respond_with(ok(json!({
                "has_more": false,
                "items": [
                    { "record_id": "rec1", "fields": { "股票代码": "600089", "股票名称": "特变电工" } },
                    { "record_id": "rec2", "fields": { "股票代码": "000001", "当前状态": "已完成" } }
                ]
            })))
            .mount(&server)
            .await;
    });

    let settings = settings(config_for(&server), app_store());
    let tokens = integrations::connect(&settings).unwrap();
    let client = BitableClient::new(tokens, settings.table_target().unwrap(), "items");

    let page = client.list_rows(100).unwrap();
    assert_eq!(page.rows.len(), 2);
    assert!(!page.has_more);
    assert_eq!(page.rows[0].text("股票名称").as_deref(), Some("特变电工"));

    client.list_rows(100).unwrap();
    assert_eq!(requests_to(&rt, &server, APP_TOKEN_PATH).len(), 1);
}

#[test]
fn test_refresh_rotation_is_persisted_to_credential_file() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(async {
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .and(body_partial_json(json!({
                "grant_type": "refresh_token",
                "refresh_token": "r-old"
            })))
            .respond_with(ok(json!({
                "access_token": "u-new-access",
                "refresh_token": "r-new",
                "expires_in": 7200
            })))
            .mount(&server)
            .await;
    });

    let temp = TempDir::new().unwrap();
    let env_file = temp.path().join(".env");
    std::fs::write(
        &env_file,
        "FEISHU_APP_ID=cli_test\nFEISHU_APP_SECRET=secret\nFEISHU_REFRESH_TOKEN=r-old\n",
    )
    .unwrap();

    let store = CredentialStore::from_file(&env_file).unwrap();
    let settings = settings(config_for(&server), store);
    let tokens = integrations::connect(&settings).unwrap();

    let credential = tokens.get_user_token().unwrap();
    assert_eq!(credential.value, "u-new-access");
    assert!(credential.expires_at.is_some());

    let saved = std::fs::read_to_string(&env_file).unwrap();
    assert!(saved.contains("FEISHU_REFRESH_TOKEN=r-new"));
    assert!(!saved.contains("r-old"));
    assert!(saved.contains("FEISHU_APP_ID=cli_test"));
}

#[test]
fn test_revoked_refresh_token_needs_authorization() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(async {
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 20064,
                "msg": "refresh token revoked"
            })))
            .mount(&server)
            .await;
    });

    let store = CredentialStore::in_memory([
        (keys::APP_ID, "cli_test"),
        (keys::APP_SECRET, "secret"),
        (keys::REFRESH_TOKEN, "r-stale"),
    ]);
    let tokens = integrations::connect(&settings(config_for(&server), store)).unwrap();

    match tokens.get_user_token() {
        Err(FeishuError::NeedsAuthorization { auth_url, .. }) => {
            assert!(auth_url.contains("/open-apis/authen/v1/index?app_id=cli_test"));
        }
        other => panic!("expected NeedsAuthorization, got {other:?}"),
    }

    // The rejected refresh value is not retried.
    assert!(matches!(tokens.get_user_token(), Err(FeishuError::NeedsAuthorization { .. })));
    assert_eq!(requests_to(&rt, &server, REFRESH_PATH).len(), 1);
}

#[test]
fn test_rejected_access_token_is_reacquired_and_resent_once() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(async {
        Mock::given(method("POST"))
            .and(path(APP_TOKEN_PATH))
            .respond_with(app_token_response("t-app-first"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(APP_TOKEN_PATH))
            .respond_with(app_token_response("t-app-second"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(RECORDS_PATH))
            .and(header("Authorization", "Bearer t-app-first"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 99991663,
                "msg": "invalid access token"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(RECORDS_PATH))
            .and(header("Authorization", "Bearer t-app-second"))
            .respond_with(ok(json!({ "has_more": false, "items": [] })))
            .mount(&server)
            .await;
    });

    let settings = settings(config_for(&server), app_store());
    let tokens = integrations::connect(&settings).unwrap();
    let client = BitableClient::new(tokens, settings.table_target().unwrap(), "items");

    let page = client.list_rows(10).unwrap();
    assert!(page.rows.is_empty());
    assert_eq!(requests_to(&rt, &server, APP_TOKEN_PATH).len(), 2);
    assert_eq!(requests_to(&rt, &server, RECORDS_PATH).len(), 2);
}

#[test]
fn test_rejected_link_is_dropped_and_status_still_written() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    let row_path = format!("{RECORDS_PATH}/rec1");
    rt.block_on(async {
        Mock::given(method("POST"))
            .and(path(APP_TOKEN_PATH))
            .respond_with(app_token_response("t-app"))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(row_path.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 1254068,
                "msg": "URLFieldConvFail"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(row_path.as_str()))
            .respond_with(ok(json!({ "record": { "record_id": "rec1", "fields": {} } })))
            .mount(&server)
            .await;
    });

    let settings = settings(config_for(&server), app_store());
    let tokens = integrations::connect(&settings).unwrap();
    let client = BitableClient::new(tokens, settings.table_target().unwrap(), "items");

    let mut fields = serde_json::Map::new();
    fields.insert("当前状态".into(), json!("已完成"));
    fields.insert("回复链接".into(), integrations::link_cell("分析报告_20250102_093000", "not a url"));

    let outcome = client.update_row_degrading("rec1", &fields, "回复链接").unwrap();
    assert!(matches!(outcome, integrations::UpdateOutcome::Degraded { ref dropped, .. } if dropped == "回复链接"));

    let bodies: Vec<Value> = requests_to(&rt, &server, &row_path)
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(bodies.len(), 2);
    assert!(bodies[0]["fields"].get("回复链接").is_some());
    assert!(bodies[1]["fields"].get("回复链接").is_none());
    assert_eq!(bodies[1]["fields"]["当前状态"], "已完成");
}

#[test]
fn test_row_crud_and_schema_listing() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(async {
        Mock::given(method("POST"))
            .and(path(APP_TOKEN_PATH))
            .respond_with(app_token_response("t-app"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/open-apis/bitable/v1/apps/bascn1/tables"))
            .respond_with(ok(json!({
                "has_more": false,
                "items": [{ "table_id": "tbl1", "name": "分析任务", "revision": 3 }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/open-apis/bitable/v1/apps/bascn1/tables/tbl1/fields"))
            .respond_with(ok(json!({
                "items": [{ "field_id": "fld1", "field_name": "股票代码", "type": 1 }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(RECORDS_PATH))
            .and(body_partial_json(json!({ "fields": { "股票代码": "600089" } })))
            .respond_with(ok(json!({
                "record": { "record_id": "recNEW", "fields": { "股票代码": "600089" } }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{RECORDS_PATH}/recNEW")))
            .respond_with(ok(json!({
                "record": { "record_id": "recNEW", "fields": { "股票代码": "600089" } }
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(format!("{RECORDS_PATH}/recNEW")))
            .respond_with(ok(json!({ "deleted": true, "record_id": "recNEW" })))
            .mount(&server)
            .await;
    });

    let settings = settings(config_for(&server), app_store());
    let tokens = integrations::connect(&settings).unwrap();
    let client = BitableClient::new(tokens, settings.table_target().unwrap(), "items");

    let tables = client.list_tables().unwrap();
    assert_eq!(tables[0].name, "分析任务");
    let fields = client.list_fields().unwrap();
    assert_eq!(fields[0].field_name, "股票代码");
    assert_eq!(fields[0].field_type, 1);

    let mut row = serde_json::Map::new();
    row.insert("股票代码".into(), json!("600089"));
    let created = client.create_row(row).unwrap();
    assert_eq!(created.record_id, "recNEW");

    let fetched = client.get_row("recNEW").unwrap();
    assert_eq!(fetched.text("股票代码").as_deref(), Some("600089"));

    client.delete_row("recNEW").unwrap();
}

// ============================================================================
// Transport Tests
// ============================================================================

#[test]
fn test_unreachable_host_is_retried_then_reported() {
    let mut config = Config::default();
    config.feishu.base_url = "http://127.0.0.1:1/open-apis".to_string();
    config.feishu.timeout_secs = 2;
    config.feishu.max_attempts = 3;
    config.feishu.retry_delay_ms = 1;

    let tokens = integrations::connect(&settings(config, app_store())).unwrap();
    match tokens.get_app_token() {
        Err(FeishuError::Transport { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected Transport error, got {other:?}"),
    }
}

#[test]
fn test_non_json_body_is_invalid_response() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(async {
        Mock::given(method("POST"))
            .and(path(APP_TOKEN_PATH))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;
    });

    let tokens = integrations::connect(&settings(config_for(&server), app_store())).unwrap();
    assert!(matches!(tokens.get_app_token(), Err(FeishuError::InvalidResponse(_))));
    // Answered requests are not retried.
    assert_eq!(requests_to(&rt, &server, APP_TOKEN_PATH).len(), 1);
}

// ============================================================================
// Document Tests
// ============================================================================

#[test]
fn test_publisher_uses_builtin_import() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(async {
        Mock::given(method("POST"))
            .and(path(APP_TOKEN_PATH))
            .respond_with(app_token_response("t-app"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/open-apis/docx/builtin/import"))
            .respond_with(ok(json!({ "document_id": "doxcnABC" })))
            .mount(&server)
            .await;
    });

    let temp = TempDir::new().unwrap();
    let config = config_for(&server);
    let settings = settings(config.clone(), app_store());
    let tokens = integrations::connect(&settings).unwrap();
    let docs = DocxClient::new(tokens, Identity::App, &config.feishu.doc_base_url);
    let publisher = DocumentPublisher::standard(docs, ResultsArchive::new(temp.path()), "https://p");

    let request = larkflow::report::PublishRequest {
        title: "600089_特变电工_分析报告_20250102_093000".into(),
        stock_code: "600089".into(),
        stock_name: "特变电工".into(),
        markdown: "# 报告".into(),
        created_at: chrono::Local::now(),
    };
    let outcome = publisher.publish(&request);
    assert_eq!(outcome.link, "https://feishu.cn/docx/doxcnABC");
    assert!(!outcome.degraded);
}

#[test]
fn test_publisher_falls_back_to_empty_document() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(async {
        Mock::given(method("POST"))
            .and(path(APP_TOKEN_PATH))
            .respond_with(app_token_response("t-app"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/open-apis/docx/builtin/import"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "code": 1254000, "msg": "not found" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/open-apis/docx/v1/documents"))
            .respond_with(ok(json!({ "document": { "document_id": "doxcnEMPTY" } })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/open-apis/docx/v1/documents/doxcnEMPTY/import"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 1770001, "msg": "unsupported" })))
            .mount(&server)
            .await;
    });

    let temp = TempDir::new().unwrap();
    let config = config_for(&server);
    let tokens = integrations::connect(&settings(config.clone(), app_store())).unwrap();
    let docs = DocxClient::new(tokens, Identity::App, &config.feishu.doc_base_url);
    let publisher = DocumentPublisher::standard(docs, ResultsArchive::new(temp.path()), "https://p");

    let request = larkflow::report::PublishRequest {
        title: "t".into(),
        stock_code: "600089".into(),
        stock_name: String::new(),
        markdown: "# 报告".into(),
        created_at: chrono::Local::now(),
    };
    let outcome = publisher.publish(&request);
    assert_eq!(outcome.link, "https://feishu.cn/docx/doxcnEMPTY");
    assert_eq!(outcome.tier, "create-then-import");
    assert!(outcome.degraded);
    assert!(temp.path().join("reports").is_dir());
}

#[test]
fn test_publisher_falls_back_to_local_file_when_docs_api_fails() {
    use chrono::TimeZone;

    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(async {
        Mock::given(method("POST"))
            .and(path(APP_TOKEN_PATH))
            .respond_with(app_token_response("t-app"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/open-apis/docx/builtin/import"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 1254000, "msg": "no permission" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/open-apis/docx/v1/documents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 1770032, "msg": "forbidden" })))
            .mount(&server)
            .await;
    });

    let temp = TempDir::new().unwrap();
    let results = temp.path().join("my results");
    let config = config_for(&server);
    let tokens = integrations::connect(&settings(config.clone(), app_store())).unwrap();
    let docs = DocxClient::new(tokens, Identity::App, &config.feishu.doc_base_url);
    let publisher = DocumentPublisher::standard(docs, ResultsArchive::new(&results), "https://p");

    let request = larkflow::report::PublishRequest {
        title: "600089_特变电工_分析报告_20250102_093000".into(),
        stock_code: "600089".into(),
        stock_name: "特变电工".into(),
        markdown: "# 报告\n\n| 指标 | 值 |\n|---|---|\n| PE | 12 |".into(),
        created_at: chrono::Local.with_ymd_and_hms(2025, 1, 2, 9, 30, 0).unwrap(),
    };
    let outcome = publisher.publish(&request);

    assert_eq!(outcome.tier, "local-file");
    assert!(outcome.degraded);
    assert!(outcome.link.starts_with("file://"));
    assert!(!outcome.link.contains(' '));
    assert!(outcome.link.ends_with("/reports/analysis_600089_20250102_093000.html"));

    let html_path = results.join("reports").join("analysis_600089_20250102_093000.html");
    let html = std::fs::read_to_string(&html_path).unwrap();
    assert!(html.contains("<table>"));
    assert!(results.join("reports").join("analysis_600089_20250102_093000.md").exists());

    assert_eq!(requests_to(&rt, &server, "/open-apis/docx/builtin/import").len(), 1);
    assert_eq!(requests_to(&rt, &server, "/open-apis/docx/v1/documents").len(), 1);
}

// ============================================================================
// End-to-end Run
// ============================================================================

#[test]
fn test_run_processes_pending_rows_and_writes_back() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(async {
        Mock::given(method("POST"))
            .and(path(APP_TOKEN_PATH))
            .respond_with(app_token_response("t-app"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(RECORDS_PATH))
            .respond_with(ok(json!({
                "has_more": false,
                "items": [
                    { "record_id": "rec1", "fields": { "股票代码": "600089", "股票名称": "特变电工" } },
                    { "record_id": "rec2", "fields": { "股票代码": "000001", "当前状态": "已完成" } },
                    { "record_id": "rec3", "fields": { "股票名称": "无代码" } }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(format!("{RECORDS_PATH}/rec1")))
            .respond_with(ok(json!({ "record": { "record_id": "rec1", "fields": {} } })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/open-apis/docx/builtin/import"))
            .respond_with(ok(json!({ "document_id": "doxcnRUN" })))
            .mount(&server)
            .await;
    });

    let temp = TempDir::new().unwrap();
    let mut config = config_for(&server);
    config.run.results_dir = temp.path().to_path_buf();
    let settings = settings(config.clone(), app_store());
    let tokens = integrations::connect(&settings).unwrap();

    let client = BitableClient::new(tokens.clone(), settings.table_target().unwrap(), "items");
    let store = BitableTaskStore::new(
        client,
        config.fields.clone(),
        StatusLabels::from_config(&config.status),
        &config.status.link_text,
        config.table.page_size,
    );
    let archive = ResultsArchive::new(temp.path());
    let docs = DocxClient::new(tokens, Identity::App, &config.feishu.doc_base_url);
    let publisher = DocumentPublisher::standard(docs, archive.clone(), "https://p");
    let analyzer = SimulatedAnalyzer;

    let options = RunOptions { throttle: Duration::ZERO, demo: false };
    let summary = Orchestrator::new(&store, &analyzer, &publisher, &archive, options).run().unwrap();

    assert_eq!(summary.found, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.outcomes[0].status, TaskStatus::Done);
    assert_eq!(summary.outcomes[0].link.as_deref(), Some("https://feishu.cn/docx/doxcnRUN"));

    let updates: Vec<Value> = requests_to(&rt, &server, &format!("{RECORDS_PATH}/rec1"))
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0]["fields"]["当前状态"], "分析中");
    assert!(updates[0]["fields"]["请求日期"].is_i64());
    assert_eq!(updates[1]["fields"]["当前状态"], "已完成");
    assert_eq!(updates[1]["fields"]["回复链接"]["link"], "https://feishu.cn/docx/doxcnRUN");
    assert!(updates[1]["fields"]["回复链接"]["text"].as_str().unwrap().starts_with("分析报告_"));

    // The analysis was archived under the stock's dated directory.
    assert!(temp.path().join("600089").is_dir());
}
