// ABOUTME: Tests for the TransportRegistry and TransportFactory pattern.
// ABOUTME: Validates runtime transport selection and creation.

use murmur_agent::backends::mock::MockTransport;
use murmur_agent::registry::TransportRegistry;
use murmur_agent::{AgentConfig, AgentTransport, StopReason, TransportFactory};
use std::path::Path;
use std::sync::Arc;

#[test]
fn test_registry_lists_available_transports() {
    let registry = TransportRegistry::default();
    let available = registry.available();
    assert!(available.contains(&"mock"));
    #[cfg(feature = "acp")]
    assert!(available.contains(&"acp"));
}

#[test]
fn test_registry_unknown_transport_errors() {
    let registry = TransportRegistry::default();
    match registry.resolve("carrier-pigeon") {
        Err(err) => {
            let msg = err.to_string();
            assert!(msg.contains("Unknown agent transport: carrier-pigeon"));
            assert!(msg.contains("mock"));
        }
        Ok(_) => panic!("Expected error for unknown transport"),
    }
}

#[tokio::test]
async fn test_mock_transport_via_registry_works() {
    let registry = TransportRegistry::default();
    let factory = registry.resolve("mock").unwrap();
    let mut transport = factory(&AgentConfig::default(), Path::new("/tmp")).unwrap();

    assert_eq!(transport.name(), "mock");
    assert_eq!(transport.initialize().await.unwrap(), None);
    let session_id = transport.new_session(Path::new("/tmp"), &[]).await.unwrap();
    assert!(session_id.starts_with("mock-session-"));

    let response = transport
        .prompt(&session_id, vec![murmur_agent::ContentBlock::text("hello")])
        .await
        .unwrap();
    assert_eq!(response.stop_reason, StopReason::EndTurn);
}

#[tokio::test]
async fn test_registry_custom_factory_replaces_default() {
    let scripted = MockTransport::new().respond(StopReason::Refusal);
    let observer = scripted.clone();
    let factory: TransportFactory = Arc::new(move |_config, _cwd| {
        Ok(Box::new(scripted.clone()) as Box<dyn AgentTransport>)
    });

    let registry = TransportRegistry::new().register("scripted", factory);
    let mut transport = registry.resolve("scripted").unwrap()(&AgentConfig::default(), Path::new("."))
        .unwrap();
    let response = transport.prompt("s", vec![]).await.unwrap();

    assert_eq!(response.stop_reason, StopReason::Refusal);
    assert_eq!(observer.prompt_count(), 1);
}

#[test]
fn test_registry_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<TransportRegistry>();
}
