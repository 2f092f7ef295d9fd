//! Upstream REST Session Client Tests
//!
//! Exercises login, instrument search and sentiment against a mock HTTP server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use rust_decimal_macros::dec;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use price_relay::application::ports::SessionProvider;
use price_relay::domain::session::SessionTokens;
use price_relay::infrastructure::upstream::{RestSessionClient, SessionClientConfig};
use price_relay::{AuthError, Credentials, ResolutionError};

fn client(server: &MockServer, epic_prefix: Option<&str>) -> RestSessionClient {
    RestSessionClient::new(SessionClientConfig {
        api_url: server.uri(),
        credentials: Credentials::new(
            "api-key".to_string(),
            "trader@example.com".to_string(),
            "secret".to_string(),
        ),
        epic_prefix: epic_prefix.map(ToString::to_string),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn tokens() -> SessionTokens {
    SessionTokens::new("cst-1", "sec-1").unwrap()
}

fn terms(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

// =============================================================================
// Login
// =============================================================================

#[tokio::test]
async fn acquire_reads_tokens_from_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .and(header("X-CAP-API-KEY", "api-key"))
        .and(body_json(json!({
            "identifier": "trader@example.com",
            "password": "secret",
            "encryptedPassword": false
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("CST", "cst-token")
                .insert_header("X-SECURITY-TOKEN", "security-token")
                .set_body_json(json!({ "accountType": "CFD" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let tokens = client(&server, None).acquire().await.unwrap();

    assert_eq!(tokens.cst(), "cst-token");
    assert_eq!(tokens.security_token(), "security-token");
}

#[tokio::test]
async fn acquire_reports_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid.details"))
        .mount(&server)
        .await;

    let err = client(&server, None).acquire().await.unwrap_err();

    assert_eq!(
        err,
        AuthError::Rejected {
            status: 401,
            message: "invalid.details".to_string(),
        }
    );
}

#[tokio::test]
async fn acquire_requires_both_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).insert_header("CST", "cst-token"))
        .mount(&server)
        .await;

    let err = client(&server, None).acquire().await.unwrap_err();

    assert_eq!(err, AuthError::MissingToken("X-SECURITY-TOKEN"));
}

#[tokio::test]
async fn acquire_reports_transport_failure() {
    let server = MockServer::start().await;
    let client = client(&server, None);
    drop(server);

    let err = client.acquire().await.unwrap_err();

    assert!(matches!(err, AuthError::Transport(_)));
}

// =============================================================================
// Instrument Resolution
// =============================================================================

#[tokio::test]
async fn resolve_picks_first_streaming_market() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets"))
        .and(query_param("searchTerm", "gold"))
        .and(header("CST", "cst-1"))
        .and(header("X-SECURITY-TOKEN", "sec-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "markets": [
                { "epic": "GOLD_OLD", "instrumentName": "Gold (old)", "streamingPricesAvailable": false },
                { "epic": "GOLD", "instrumentName": "Gold", "streamingPricesAvailable": true },
                { "epic": "GOLD2", "instrumentName": "Gold 2", "streamingPricesAvailable": true }
            ]
        })))
        .mount(&server)
        .await;

    let epic = client(&server, None)
        .resolve_instrument(&tokens(), &terms(&["gold"]))
        .await
        .unwrap();

    assert_eq!(epic, "GOLD");
}

#[tokio::test]
async fn resolve_tries_terms_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets"))
        .and(query_param("searchTerm", "XAUUSD"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "markets": [] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/markets"))
        .and(query_param("searchTerm", "gold"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "markets": [{ "epic": "GOLD", "streamingPricesAvailable": true }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let epic = client(&server, None)
        .resolve_instrument(&tokens(), &terms(&["XAUUSD", "gold"]))
        .await
        .unwrap();

    assert_eq!(epic, "GOLD");
}

#[tokio::test]
async fn resolve_with_prefix_ignores_streaming_flag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "markets": [
                { "epic": "GOLD", "streamingPricesAvailable": true },
                { "epic": "XAUUSD", "streamingPricesAvailable": false }
            ]
        })))
        .mount(&server)
        .await;

    let epic = client(&server, Some("XAU"))
        .resolve_instrument(&tokens(), &terms(&["gold"]))
        .await
        .unwrap();

    assert_eq!(epic, "XAUUSD");
}

#[tokio::test]
async fn resolve_not_found_lists_terms() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "markets": [{ "epic": "SILVER", "streamingPricesAvailable": false }]
        })))
        .mount(&server)
        .await;

    let err = client(&server, None)
        .resolve_instrument(&tokens(), &terms(&["gold", "XAU"]))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ResolutionError::NotFound {
            terms: terms(&["gold", "XAU"]),
        }
    );
}

#[tokio::test]
async fn resolve_surfaces_request_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = client(&server, None)
        .resolve_instrument(&tokens(), &terms(&["gold"]))
        .await
        .unwrap_err();

    assert!(matches!(err, ResolutionError::Request(message) if message.contains("500")));
}

// =============================================================================
// Sentiment
// =============================================================================

#[tokio::test]
async fn sentiment_maps_position_percentages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clientsentiment/GOLD"))
        .and(header("CST", "cst-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "marketId": "GOLD",
            "longPositionPercentage": 62.5,
            "shortPositionPercentage": 37.5
        })))
        .mount(&server)
        .await;

    let sentiment = client(&server, None)
        .fetch_sentiment(&tokens(), "GOLD")
        .await
        .unwrap();

    assert_eq!(sentiment.buyers, dec!(62.5));
    assert_eq!(sentiment.sellers, dec!(37.5));
}

#[tokio::test]
async fn sentiment_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clientsentiment/GOLD"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = client(&server, None).fetch_sentiment(&tokens(), "GOLD").await;

    assert!(result.is_err());
}
