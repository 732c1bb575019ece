/// Integration tests with a mocked LLM provider
/// Exercises both calling conventions without hitting a real vendor
use porquienvotar_api::config::LlmSettings;
use porquienvotar_api::errors::AppError;
use porquienvotar_api::integrations::llm_gateway::{LlmGateway, ProviderKind, StreamEvent};
use porquienvotar_api::models::ChatMessage;
use tokio_stream::StreamExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ANSWER: &str = r#"{"client_response":{"message":"¿Qué tema te preocupa más?","is_final_answer":false},"hidden_analysis":{"user_location_inferred":"Medellín, ANT","winning_candidate":"Indeciso","user_intents":[{"topic":"Seguridad","sentiment":"Preocupado","urgency":"Alta"}]}}"#;

/// Helper function to create a gateway pointing at the mock server
fn create_test_gateway(base_url: String) -> LlmGateway {
    LlmGateway::new(&LlmSettings {
        provider: ProviderKind::OpenAi,
        model: "test-model".to_string(),
        api_key: Some("test_key".to_string()),
        base_url,
        timeout_secs: 5,
    })
    .unwrap()
}

fn completion_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}
        ]
    })
}

/// Splits `content` into SSE chunks of at most `size` characters.
fn sse_body(content: &str, size: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    let mut body = String::new();
    for piece in chars.chunks(size) {
        let fragment: String = piece.iter().collect();
        let chunk = serde_json::json!({
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": fragment}}]
        });
        body.push_str(&format!("data: {}\n\n", chunk));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn history() -> Vec<ChatMessage> {
    vec![ChatMessage::user("Me preocupa la seguridad en mi barrio")]
}

#[tokio::test]
async fn test_complete_parses_structured_answer() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test_key"))
        .and(body_partial_json(serde_json::json!({"model": "test-model"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(ANSWER)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let gateway = create_test_gateway(mock_server.uri());
    let response = gateway.complete(&history()).await.unwrap();

    assert_eq!(response.client_response.message, "¿Qué tema te preocupa más?");
    let analysis = response.hidden_analysis.unwrap();
    assert_eq!(analysis.user_location_inferred.as_deref(), Some("Medellín, ANT"));
    assert_eq!(analysis.user_intents[0].topic, "Seguridad");
}

#[tokio::test]
async fn test_complete_sends_system_prompt_first() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(ANSWER)))
        .mount(&mock_server)
        .await;

    let gateway = create_test_gateway(mock_server.uri());
    gateway.complete(&history()).await.unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[1]["role"], "user");
    assert_eq!(messages[1]["content"], "Me preocupa la seguridad en mi barrio");
}

#[tokio::test]
async fn test_complete_accepts_fenced_json() {
    let mock_server = MockServer::start().await;
    let fenced = format!("```json\n{}\n```", ANSWER);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(&fenced)))
        .mount(&mock_server)
        .await;

    let gateway = create_test_gateway(mock_server.uri());
    let response = gateway.complete(&history()).await.unwrap();
    assert!(!response.client_response.is_final_answer);
}

#[tokio::test]
async fn test_complete_provider_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&mock_server)
        .await;

    let gateway = create_test_gateway(mock_server.uri());
    let err = gateway.complete(&history()).await.unwrap_err();

    assert!(matches!(err, AppError::ExternalApiError(_)));
    assert!(err.to_string().contains("upstream exploded"));
}

#[tokio::test]
async fn test_complete_empty_content_is_invalid() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("  ")))
        .mount(&mock_server)
        .await;

    let gateway = create_test_gateway(mock_server.uri());
    let err = gateway.complete(&history()).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidLlmResponse(_)));
}

#[tokio::test]
async fn test_stream_yields_deltas_partials_and_final_object() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({
            "stream": true,
            "response_format": {"type": "json_schema"}
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(ANSWER, 7)),
        )
        .mount(&mock_server)
        .await;

    let gateway = create_test_gateway(mock_server.uri());
    let events: Vec<StreamEvent> = gateway
        .stream(&history())
        .await
        .unwrap()
        .map(|event| event.unwrap())
        .collect()
        .await;

    let text: String = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Delta(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, ANSWER);

    // Visible message only ever grows.
    let partial_messages: Vec<String> = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Partial(partial) => partial.message.clone(),
            _ => None,
        })
        .collect();
    assert!(!partial_messages.is_empty());
    for pair in partial_messages.windows(2) {
        assert!(pair[1].starts_with(&pair[0]));
    }

    match events.last() {
        Some(StreamEvent::Done(response)) => {
            assert_eq!(response.client_response.message, "¿Qué tema te preocupa más?");
        }
        other => panic!("expected final object, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_truncated_answer_fails_validation() {
    let mock_server = MockServer::start().await;
    let truncated: String = ANSWER.chars().take(40).collect();

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&truncated, 10)),
        )
        .mount(&mock_server)
        .await;

    let gateway = create_test_gateway(mock_server.uri());
    let events: Vec<Result<StreamEvent, AppError>> =
        gateway.stream(&history()).await.unwrap().collect().await;

    assert!(matches!(events.first(), Some(Ok(StreamEvent::Delta(_)))));
    assert!(matches!(events.last(), Some(Err(AppError::InvalidLlmResponse(_)))));
}

#[tokio::test]
async fn test_stream_provider_error_before_first_byte() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
        .mount(&mock_server)
        .await;

    let gateway = create_test_gateway(mock_server.uri());
    assert!(matches!(
        gateway.stream(&history()).await,
        Err(AppError::ExternalApiError(_))
    ));
}

#[tokio::test]
async fn test_mock_mode_never_calls_provider() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let gateway = LlmGateway::new(&LlmSettings {
        provider: ProviderKind::Google,
        model: "gemini-2.5-flash".to_string(),
        api_key: None,
        base_url: mock_server.uri(),
        timeout_secs: 5,
    })
    .unwrap();

    assert!(gateway.is_mock());
    let response = gateway.complete(&history()).await.unwrap();
    assert!(response.client_response.message.starts_with("Modo de desarrollo"));
}
