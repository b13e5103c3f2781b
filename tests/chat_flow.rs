use clap::Parser;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatwise::assistant::Assistant;
use chatwise::cli::Args;
use chatwise::conversation::Role;

fn args_for(server_uri: &str, extra: &[&str]) -> Args {
    let mut argv = vec![
        "chatwise",
        "--provider",
        "openai",
        "--openai-api-key",
        "sk-test",
        "--anthropic-api-key",
        "",
        "--openai-base-url",
        server_uri,
    ];
    argv.extend_from_slice(extra);
    Args::try_parse_from(argv).expect("args parse")
}

fn completion_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 4}
    })
}

#[tokio::test]
async fn exchange_updates_history_and_cost_ledger() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Hello back!")))
        .expect(1)
        .mount(&server)
        .await;

    let args = args_for(&server.uri(), &[]);
    let mut assistant = Assistant::new(&args).expect("assistant");

    assert_eq!(assistant.provider_name(), "openai");
    assert_eq!(assistant.model(), "gpt-4o-mini");

    let exchange = assistant.send("Hello!").await.expect("exchange");

    assert_eq!(exchange.reply, "Hello back!");
    assert_eq!(exchange.provider, "openai");
    assert!(exchange.input_tokens > 0);
    assert!(exchange.output_tokens > 0);
    assert!(exchange.cost > 0.0);

    let messages = assistant.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "Hello!");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hello back!");

    let costs = assistant.costs();
    assert_eq!(costs.entries().len(), 1);
    assert!((costs.total_cost() - exchange.cost).abs() < 1e-12);
    assert_eq!(costs.total_input_tokens(), exchange.input_tokens);
    assert_eq!(costs.total_output_tokens(), exchange.output_tokens);
}

#[tokio::test]
async fn hard_limit_gate_blocks_after_crossing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
        .expect(1)
        .mount(&server)
        .await;

    // A limit tiny enough that the first call crosses it.
    let args = args_for(&server.uri(), &["--cost-hard-limit", "0.0000001"]);
    let mut assistant = Assistant::new(&args).expect("assistant");

    assert!(assistant.can_spend());
    assistant.send("first").await.expect("first call allowed");

    // The call that crossed the limit succeeded; the next is refused
    // before any message is appended.
    assert!(!assistant.can_spend());
    let history_len = assistant.conversation().len();
    let err = assistant.send("second").await.expect_err("gate refuses");
    assert!(err.to_string().contains("hard cost limit"));
    assert_eq!(assistant.conversation().len(), history_len);
    assert_eq!(assistant.costs().entries().len(), 1);
}

#[tokio::test]
async fn streaming_exchange_is_accounted_like_a_whole_response() {
    let server = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"str\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"eam\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let args = args_for(&server.uri(), &[]);
    let mut assistant = Assistant::new(&args).expect("assistant");

    let mut seen = Vec::new();
    let exchange = assistant
        .send_streaming("go", |fragment| seen.push(fragment.to_string()))
        .await
        .expect("streamed exchange");

    assert_eq!(seen, vec!["str", "eam"]);
    assert_eq!(exchange.reply, "stream");
    assert_eq!(assistant.conversation().len(), 2);
    assert_eq!(assistant.costs().entries().len(), 1);
}

#[tokio::test]
async fn system_prompt_is_pinned_and_survives_clear() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("noted")))
        .mount(&server)
        .await;

    let args = args_for(&server.uri(), &["--system-prompt", "You are concise."]);
    let mut assistant = Assistant::new(&args).expect("assistant");

    assistant.send("hi").await.expect("exchange");
    assert_eq!(assistant.conversation().len(), 3);

    assistant.clear_conversation();
    let messages = assistant.conversation().messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[0].content, "You are concise.");
}

#[tokio::test]
async fn switching_to_unconfigured_provider_fails() {
    let server = MockServer::start().await;
    let args = args_for(&server.uri(), &[]);
    let mut assistant = Assistant::new(&args).expect("assistant");

    assert_eq!(assistant.available_providers(), vec!["openai"]);
    assert!(assistant.switch_provider("anthropic").is_err());
    assert_eq!(assistant.provider_name(), "openai");
}
