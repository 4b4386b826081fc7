//! Credential-refresh flow: a 401 triggers an access-token exchange and one
//! extra attempt signed with the replacement token.

use std::sync::Arc;

use restbind::oauth::FixedNonceSource;
use restbind::prelude::*;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Fixture {
    server: MockServer,
    holder: Arc<TokenHolder>,
    interface: Arc<InterfaceConfig>,
}

async fn fixture(retry_budget: u32) -> Fixture {
    let server = MockServer::start().await;

    // Exchange endpoint: issues the replacement token.
    Mock::given(method("GET"))
        .and(path("/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "oauth_token=fresh&oauth_token_secret=fresh-secret&oauth_session_handle=sh2",
        ))
        .mount(&server)
        .await;

    // Protected resource: rejects the stale token, accepts the fresh one.
    Mock::given(method("GET"))
        .and(path("/protected"))
        .and(query_param("oauth_token", "stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/protected"))
        .and(query_param("oauth_token", "fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"secret": 7})))
        .mount(&server)
        .await;

    let consumer = Consumer::new("consumer-key", "consumer-secret");
    let holder = Arc::new(TokenHolder::new(
        Token::new("stale", "stale-secret").with_extra("oauth_session_handle", "sh1"),
    ));
    let nonce = Arc::new(FixedNonceSource {
        timestamp: 1_191_242_096,
        nonce: "fixed-nonce".into(),
    });

    let service: Arc<dyn RestService> = Arc::new(DefaultRestService::new());
    let refresher = Arc::new(
        OAuthTokenRefresher::new(
            service.clone(),
            format!("{}/oauth/access_token", server.uri()),
            consumer.clone(),
            holder.clone(),
        )
        .with_nonce_source(nonce.clone()),
    );
    let signer = Arc::new(
        OAuthInterceptor::new(consumer, holder.clone())
            .with_destination(SignDestination::Query)
            .with_nonce_source(nonce),
    );

    let interface = InterfaceConfig::builder("vault", server.uri())
        .interceptor(signer)
        .default_retry_handler(Arc::new(RefreshAuthorizationRetryHandler::new(
            retry_budget,
            refresher,
        )))
        .method(MethodConfigBuilder::new("read_secret").path("/protected"))
        .method(
            MethodConfigBuilder::new("broken")
                .path("/broken")
                .return_kind(ReturnKind::RawText),
        )
        .build()
        .unwrap();

    Fixture {
        server,
        holder,
        interface,
    }
}

#[tokio::test]
async fn unauthorized_refreshes_token_and_retries_once() {
    let fx = fixture(0).await;
    let dispatcher =
        InvocationDispatcher::new(fx.interface.clone(), Arc::new(DefaultRestService::new()));

    let result = dispatcher.invoke("read_secret", &[]).await.unwrap();
    assert_eq!(result.as_json().unwrap()["secret"], 7);

    // The replacement token was installed, session handle included.
    let token = fx.holder.current();
    assert_eq!(token.value(), "fresh");
    assert_eq!(token.extra("oauth_session_handle"), Some("sh2"));

    // stale attempt + exchange + fresh attempt
    let requests = fx.server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn non_unauthorized_errors_get_no_extra_attempt() {
    let fx = fixture(0).await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&fx.server)
        .await;

    let dispatcher =
        InvocationDispatcher::new(fx.interface.clone(), Arc::new(DefaultRestService::new()));

    let err = dispatcher.invoke("broken", &[]).await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    // no refresh happened: the token is still the stale one
    assert_eq!(fx.holder.current().value(), "stale");
}
