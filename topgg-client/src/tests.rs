use crate::{ApiRequest, PipelineConfig, RetryConfig, TopggClient, MAX_WAIT};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::json;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use topgg_core::{ApiError, BotQuery, CoreError, SortBy, Stats};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BOT_ID: u64 = 264811613708746752;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("topgg_client=debug")
        .with_test_writer()
        .try_init();
}

fn test_token() -> String {
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"id":"{}","bot":true}}"#, BOT_ID));
    format!("eyJhbGciOiJIUzI1NiJ9.{}.signature", claims)
}

fn client_for(server: &MockServer, retry: RetryConfig) -> TopggClient {
    init_tracing();
    TopggClient::with_config(
        test_token(),
        PipelineConfig {
            base_url: server.uri(),
            retry,
            ..PipelineConfig::default()
        },
    )
    .unwrap()
}

fn bot_json() -> serde_json::Value {
    json!({
        "clientid": BOT_ID.to_string(),
        "id": BOT_ID.to_string(),
        "username": "Luca",
        "prefix": "-",
        "shortdesc": "A bot",
        "longdesc": "",
        "tags": [],
        "owners": ["129908908096487424"],
        "date": "2017-04-26T18:08:17.125Z",
        "points": 10,
        "monthlyPoints": 2,
        "avatar": ""
    })
}

#[tokio::test]
async fn test_get_bot_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/bots/{}", BOT_ID)))
        .and(header("authorization", format!("Bearer {}", test_token()).as_str()))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bot_json()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryConfig::default());
    let bot = assert_ok!(client.get_bot(BOT_ID).await);
    assert_eq!(bot.id, BOT_ID);
    assert_eq!(bot.username, "Luca");
    assert_eq!(bot.votes, 10);
}

#[tokio::test]
async fn test_post_stats_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bots/stats"))
        .and(body_json(json!({ "server_count": 1500 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryConfig::default());
    assert_ok!(client.post_stats(Stats::new(1500)).await);

    let metrics = client.metrics().await;
    assert_eq!(metrics.totals.attempts, 1);
    assert_eq!(metrics.totals.successes, 1);
    assert!(metrics.buckets.contains_key("POST /bots/stats"));
}

#[tokio::test]
async fn test_retries_once_after_429() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weekend"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0.05"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/weekend"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "is_weekend": true })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryConfig::default());
    let started = std::time::Instant::now();
    assert!(assert_ok!(client.is_weekend().await));
    assert!(started.elapsed() >= Duration::from_millis(50));

    let metrics = client.metrics().await;
    assert_eq!(metrics.totals.attempts, 2);
    assert_eq!(metrics.totals.rate_limited, 1);
    assert_eq!(metrics.totals.retries, 1);
}

#[tokio::test]
async fn test_second_429_surfaces_ratelimited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weekend"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(json!({ "retry_after": 0.02 })),
        )
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryConfig::default());
    let error = assert_err!(client.is_weekend().await);
    match error {
        CoreError::Api(ApiError::Ratelimited { retry_after }) => {
            assert_eq!(retry_after, Duration::from_millis(20));
        }
        other => panic!("expected Ratelimited, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fail_fast_does_not_retry_long_waits() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bots/stats"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "60"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryConfig::fail_fast());
    let error = assert_err!(client.post_stats(Stats::new(2)).await);
    assert!(matches!(
        error,
        CoreError::Api(ApiError::Ratelimited { .. })
    ));

    // The bucket stays penalized for later callers.
    let request = ApiRequest::post("/bots/stats", &Stats::new(2)).unwrap();
    let status = client.rate_limit_status(&request).await;
    assert!(status.is_blocked());
    assert!(status.penalized_for.is_some());
}

#[tokio::test]
async fn test_auth_failures_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bots/stats"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/1"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryConfig::default());
    assert!(matches!(
        client.get_bot_stats().await,
        Err(CoreError::Api(ApiError::Unauthorized { .. }))
    ));
    assert!(matches!(
        client.get_user(1).await,
        Err(CoreError::Api(ApiError::Forbidden { .. }))
    ));
}

#[tokio::test]
async fn test_not_found_and_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bots/7"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bots/8"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryConfig::default());
    assert!(matches!(
        client.get_bot(7).await,
        Err(CoreError::Api(ApiError::NotFound { .. }))
    ));
    assert!(matches!(
        client.get_bot(8).await,
        Err(CoreError::Api(ApiError::ServerError { status_code: 503 }))
    ));
}

#[tokio::test]
async fn test_invalid_json_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weekend"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let client = client_for(&server, RetryConfig::default());
    assert!(matches!(
        client.is_weekend().await,
        Err(CoreError::Api(ApiError::InvalidResponse { .. }))
    ));
}

#[tokio::test]
async fn test_response_headers_update_bucket() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset-after", "30")
                .set_body_json(json!({ "id": "1", "username": "someone" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryConfig::default());
    let user = assert_ok!(client.get_user(1).await);
    assert_eq!(user.username, "someone");

    let status = client
        .rate_limit_status(&ApiRequest::get("/users/2"))
        .await;
    assert_eq!(status.bucket, "GET /users/:id");
    assert_eq!(status.remaining, Some(0));
    assert!(status.is_blocked());
}

#[tokio::test]
async fn test_absurd_rate_limit_values_are_capped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weekend"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1.5e19"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset-after", "1.5e19")
                .set_body_json(json!({ "id": "1", "username": "someone" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryConfig::fail_fast());

    let error = assert_err!(client.is_weekend().await);
    match error {
        CoreError::Api(ApiError::Ratelimited { retry_after }) => assert_eq!(retry_after, MAX_WAIT),
        other => panic!("expected Ratelimited, got {:?}", other),
    }

    assert_ok!(client.get_user(1).await);
    let status = client.rate_limit_status(&ApiRequest::get("/users/1")).await;
    assert!(status.is_blocked());
    assert!(status.reset_in.unwrap() <= MAX_WAIT);
}

#[tokio::test]
async fn test_cancel_while_waiting_on_bucket() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bots/stats"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryConfig::default());
    let request = ApiRequest::post("/bots/stats", &Stats::new(5)).unwrap();
    client
        .pipeline()
        .rate_limiter()
        .penalize(&request.bucket(), Duration::from_secs(60), false)
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = client.post_stats_until(Stats::new(5), &cancel).await;
    assert!(matches!(result, Err(CoreError::Cancelled)));
}

#[tokio::test]
async fn test_query_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bots"))
        .and(query_param("limit", "50"))
        .and(query_param("sort", "monthlyPoints"))
        .and(query_param("search", "username: luca"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [bot_json()],
            "limit": 50,
            "offset": 0,
            "count": 1,
            "total": 1
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bots/check"))
        .and(query_param("userId", "99"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "voted": 1 })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/bots/{}/votes", BOT_ID)))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "99", "username": "voter", "avatar": "" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryConfig::default());

    let query = BotQuery::new()
        .limit(50)
        .sort_by(SortBy::MonthlyVotes)
        .search("username", "luca");
    let page = assert_ok!(client.get_bots(&query).await);
    assert_eq!(page.results.len(), 1);

    assert!(assert_ok!(client.has_voted(99).await));

    let voters = assert_ok!(client.get_bot_votes(2).await);
    assert_eq!(voters[0].id, 99);
}
