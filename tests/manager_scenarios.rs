//! Integration coverage for the concrete scenarios that cut across more than
//! one module (manager dispatch, streaming reassembly, stop-reason mapping)
//! rather than a single unit.

use std::sync::{Arc, Mutex};

use llmswitch::manager::{Manager, Request};
use llmswitch::providers::mock::MockGenerator;
use llmswitch::{opt, Error, GenerationResult, Message, OptionBag, Role};

#[tokio::test]
async fn provider_filter_selects_the_named_provider_among_identical_models() {
    let mut manager = Manager::new();
    manager.register("p1", Arc::new(MockGenerator::new(1)));
    manager.register("p2", Arc::new(MockGenerator::new(2)));

    let request = Request::new("eliza-1966-en", Message::user("hi")).for_provider("p2");
    let (reply, _usage) = manager.ask(request).await.unwrap();
    assert!(reply.text().contains("seed 2"));
}

#[tokio::test]
async fn registration_order_breaks_ties_when_no_provider_is_named() {
    let mut manager = Manager::new();
    manager.register("p1", Arc::new(MockGenerator::new(11)));
    manager.register("p2", Arc::new(MockGenerator::new(22)));

    let request = Request::new("eliza-1966-en", Message::user("hi"));
    let (reply, _usage) = manager.ask(request).await.unwrap();
    assert!(reply.text().contains("seed 11"));
}

#[tokio::test]
async fn streaming_chunks_join_to_the_final_message_text() {
    let mut manager = Manager::new();
    manager.register("mock", Arc::new(MockGenerator::new(7)));

    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = seen.clone();
    let options = OptionBag::apply(vec![opt::stream(move |role, text| {
        assert_eq!(role, Role::Assistant);
        sink.lock().unwrap().push(text.to_string());
    })])
    .unwrap();

    let request = Request::new("eliza-1966-en", Message::user("Why is the sky blue?")).with_options(options);
    let (reply, _usage) = manager.ask(request).await.unwrap();

    let joined: String = seen.lock().unwrap().concat();
    assert_eq!(joined, reply.text());
}

#[test]
fn max_tokens_stop_reason_is_non_fatal_and_carries_the_truncated_text() {
    let (result, sentinel) = llmswitch::error::map_stop_reason("max_tokens");
    assert_eq!(result, GenerationResult::MaxTokens);
    let err = sentinel.expect("max_tokens must carry a sentinel");
    assert!(err.is_non_fatal());
    assert!(matches!(err, Error::MaxTokens));
}
