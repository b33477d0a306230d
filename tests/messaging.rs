use coachlink_client::{ClientError, SessionOrchestrator, Settings, UserType};
use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header_exists, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const CONVERSATION: &str = "conv-1";

async fn backend() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

fn settings(server: &MockServer, refresh_after_send: bool) -> Settings {
    let mut config = Settings::defaults().expect("Failed to load default config");
    config.backend.primary_url = server.uri();
    config.backend.probe_timeout_secs = 1;
    config.rate_limit.min_interval_ms = 0;
    config.rate_limit.backoff_schedule_ms = vec![20, 40];
    config.quota.refresh_after_send = refresh_after_send;
    config.identity.user_id = "client-1".into();
    config.identity.user_type = UserType::Client;
    config
}

fn daily_quota(remaining: i64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "remaining": remaining,
        "total": 5,
        "used": 5 - remaining
    }))
}

fn sent_message(kind: &str, daily_remaining: Option<i64>, clips_remaining: Option<i64>) -> ResponseTemplate {
    ResponseTemplate::new(201).set_body_json(json!({
        "message": {
            "_id": "msg-1",
            "senderId": "client-1",
            "senderType": "client",
            "content": "hello coach",
            "messageType": kind,
            "createdAt": "2024-05-01T14:00:00Z"
        },
        "dailyMessagesRemaining": daily_remaining,
        "clipsRemaining": clips_remaining
    }))
}

#[test_log::test(tokio::test)]
async fn test_text_send_updates_daily_allowance() {
    let server = backend().await;
    Mock::given(method("GET"))
        .and(path("/api/conversations/conv-1/daily-messages"))
        .respond_with(daily_quota(3))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/conversations/conv-1/messages"))
        .and(header_exists("x-request-id"))
        .and(body_partial_json(json!({
            "senderId": "client-1",
            "senderType": "client",
            "content": "hello coach",
            "messageType": "text"
        })))
        .respond_with(sent_message("text", Some(2), None))
        .expect(1)
        .mount(&server)
        .await;
    // Authoritative refresh after the send
    Mock::given(method("GET"))
        .and(path("/api/conversations/conv-1/daily-messages"))
        .respond_with(daily_quota(2))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = SessionOrchestrator::from_settings(&settings(&server, true)).unwrap();
    let message = orchestrator
        .send_text_message(CONVERSATION, "hello coach")
        .await
        .unwrap();
    assert_eq!(message.id, "msg-1");

    let projected = orchestrator.quota().cached_daily_quota(CONVERSATION).await.unwrap();
    assert_eq!(projected.projected.remaining, 2);

    orchestrator.settle_refreshes().await;
    let settled = orchestrator.quota().cached_daily_quota(CONVERSATION).await.unwrap();
    assert!(!settled.refresh_pending);
    assert_eq!(settled.authoritative.remaining, 2);

    orchestrator.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_daily_limit_lost_to_another_device() {
    let server = backend().await;
    Mock::given(method("GET"))
        .and(path("/api/conversations/conv-1/daily-messages"))
        .respond_with(daily_quota(1))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/conversations/conv-1/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "Daily message limit reached",
            "dailyLimitReached": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = SessionOrchestrator::from_settings(&settings(&server, true)).unwrap();

    let err = orchestrator
        .send_text_message(CONVERSATION, "hello coach")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::DailyLimitReached));

    // Refused locally without another round-trip
    let err = orchestrator
        .send_text_message(CONVERSATION, "are you there?")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::DailyLimitReached));
}

#[test_log::test(tokio::test)]
async fn test_clip_refused_when_backend_reports_expiry() {
    let server = backend().await;
    Mock::given(method("GET"))
        .and(path("/api/conversations/conv-1/clips"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "remaining": 3,
            "total": 7,
            "used": 4,
            "chatExpiry": { "daysRemaining": 0, "isExpired": true }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/conversations/conv-1/messages"))
        .respond_with(sent_message("video", None, Some(2)))
        .expect(0)
        .mount(&server)
        .await;

    let orchestrator = SessionOrchestrator::from_settings(&settings(&server, false)).unwrap();

    let err = orchestrator
        .send_clip(CONVERSATION, "file:///clips/swing.mp4")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::ChatExpired));

    let err = orchestrator
        .send_text_message(CONVERSATION, "one more thing")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::ChatExpired));
}

#[test_log::test(tokio::test)]
async fn test_conversation_state_in_one_read() {
    let server = backend().await;
    Mock::given(method("GET"))
        .and(path("/api/conversations/conv-1/messages"))
        .and(query_param("limit", "20"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [{
                "_id": "msg-1",
                "senderId": "coach-1",
                "senderType": "coach",
                "content": "Welcome!",
                "messageType": "text"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/conversations/conv-1/clips"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "remaining": 9,
            "total": 7,
            "used": 0,
            "chatExpiry": { "daysRemaining": 4, "isExpired": false }
        })))
        .expect(1)
        .mount(&server)
        .await;
    // Daily endpoint down: falls back to the full default allowance
    Mock::given(method("GET"))
        .and(path("/api/conversations/conv-1/daily-messages"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = SessionOrchestrator::from_settings(&settings(&server, false)).unwrap();
    let state = orchestrator
        .fetch_conversation_state(CONVERSATION, 20)
        .await
        .unwrap();

    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].sender_type, UserType::Coach);
    // Clamped into [0, total]
    assert_eq!(state.clip_quota.remaining, 7);
    assert_eq!(state.chat_expiry.days_remaining, Some(4));
    assert_eq!(state.daily_quota.remaining, 5);
    assert_eq!(state.daily_quota.total, 5);
}

#[test_log::test(tokio::test)]
async fn test_conversation_listing_and_read_receipts() {
    let server = backend().await;
    Mock::given(method("GET"))
        .and(path("/api/conversations/client-1/client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "conversations": [{
                "_id": "conv-1",
                "clientId": "client-1",
                "coachId": "coach-1",
                "unreadCount": 2
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/conversations/conv-1/read"))
        .and(body_partial_json(json!({ "userType": "client" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_id": "conv-1",
            "clientId": "client-1",
            "coachId": "coach-1",
            "unreadCount": 0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = SessionOrchestrator::from_settings(&settings(&server, false)).unwrap();

    let conversations = orchestrator.list_conversations().await.unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].unread_count, 2);

    let conversation = orchestrator.mark_read(CONVERSATION).await.unwrap();
    assert_eq!(conversation.unread_count, 0);
}

#[test_log::test(tokio::test)]
async fn test_expired_credentials_surface_as_authentication_error() {
    let server = backend().await;
    Mock::given(method("GET"))
        .and(path("/api/conversations/client-1/client"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = SessionOrchestrator::from_settings(&settings(&server, false)).unwrap();
    let err = orchestrator.list_conversations().await.unwrap_err();
    assert!(matches!(err, ClientError::AuthenticationRequired));
}
