use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;
use vc_exchange::{
    core::{exchange::ExchangeClient, status::VerificationResult},
    verifier::{
        poller::{AbandonReason, PollLimits, PollOutcome, PollState, StatusPoller},
        session::{MemoryStore, Transaction, TransactionStore},
        VerificationOutcome, Verifier,
    },
    ExchangeError,
};


use mock_api::{config, matti_sd_jwt, MockApi, REMOTE_STATE};

async fn verifier(api: Arc<MockApi>) -> Arc<Verifier> {
    let config = config();
    let exchange = ExchangeClient::connect(api, &config).await.unwrap();
    Arc::new(
        Verifier::builder()
            .with_config(&config)
            .with_exchange_client(exchange)
            .with_transaction_store(Arc::new(MemoryStore::default()))
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn request_is_bound_to_the_remote_session() {
    let api = Arc::new(MockApi::default());
    let verifier = verifier(api.clone()).await;

    let request = verifier.create_request().await.unwrap();

    assert_eq!(request.request_uri.scheme(), "openid4vp");
    assert_eq!(
        verifier
            .transactions()
            .remote_token(request.transaction_id)
            .await
            .unwrap()
            .as_deref(),
        Some(REMOTE_STATE)
    );

    let (_, _, headers, body) = api.requests_to("/openid4vc/verify").remove(0);
    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .unwrap()
    };
    assert_eq!(header("authorizebaseurl"), "openid4vp://authorize");
    assert_eq!(header("responsemode"), "direct_post");
    assert_eq!(header("accept"), "*/*");
    assert_eq!(
        header("successredirecturi"),
        format!("https://hsl.example.com/success?id={}", request.transaction_id)
    );
    assert_eq!(
        header("errorredirecturi"),
        format!("https://hsl.example.com/error?id={}", request.transaction_id)
    );

    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        body["request_credentials"][0]["vct"],
        json!("https://issuer.example.com/PensionCredential")
    );
    assert_eq!(
        body["presentation_definition"]["input_descriptors"][0]["constraints"]
            ["limit_disclosure"],
        json!("required")
    );
}

/// Remembers every transaction it creates.
#[derive(Debug, Default)]
struct RecordingStore {
    inner: MemoryStore,
    created: std::sync::Mutex<Vec<Uuid>>,
}

#[async_trait]
impl TransactionStore for RecordingStore {
    async fn create(&self) -> Result<Transaction, ExchangeError> {
        let transaction = self.inner.create().await?;
        self.created.lock().unwrap().push(transaction.id);
        Ok(transaction)
    }

    async fn bind(&self, id: Uuid, remote_session_token: String) -> Result<(), ExchangeError> {
        self.inner.bind(id, remote_session_token).await
    }

    async fn remote_token(&self, id: Uuid) -> Result<Option<String>, ExchangeError> {
        self.inner.remote_token(id).await
    }

    async fn remove(&self, id: Uuid) -> Result<(), ExchangeError> {
        self.inner.remove(id).await
    }
}

async fn assert_request_rejected(verify_response: &str) {
    let api = Arc::new(MockApi::default());
    *api.verify_response.lock().unwrap() = Some(verify_response.to_owned());
    let config = config();
    let store = Arc::new(RecordingStore::default());
    let verifier = Verifier::builder()
        .with_config(&config)
        .with_exchange_client(ExchangeClient::connect(api, &config).await.unwrap())
        .with_transaction_store(store.clone())
        .build()
        .unwrap();

    let result = verifier.create_request().await;
    assert!(
        matches!(result, Err(ExchangeError::InvalidResponse(_))),
        "{result:?}"
    );

    let created = store.created.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(store.remote_token(created[0]).await.unwrap(), None);
}

#[tokio::test]
async fn request_uri_without_state_is_rejected() {
    assert_request_rejected("openid4vp://authorize?response_type=vp_token&client_id=verifier")
        .await;
}

#[tokio::test]
async fn request_uri_that_is_not_a_url_is_rejected() {
    assert_request_rejected("session created").await;
}

#[tokio::test]
async fn status_of_an_unbound_transaction_is_not_fetched() {
    let api = Arc::new(MockApi::default());
    let verifier = verifier(api.clone()).await;
    let transaction = verifier.transactions().create().await.unwrap();

    let result = verifier.status(transaction.id).await;
    assert!(matches!(result, Err(ExchangeError::UnknownTransaction(_))));
    assert!(matches!(
        verifier.status(Uuid::new_v4()).await,
        Err(ExchangeError::UnknownTransaction(_))
    ));
    assert_eq!(api.status_requests.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn verified_credential_flows_into_attributes() {
    let api = Arc::new(MockApi::with_statuses([
        json!({"id": REMOTE_STATE}),
        json!({"id": REMOTE_STATE, "verificationResult": null}),
        json!({
            "id": REMOTE_STATE,
            "verificationResult": "success",
            "policyResults": {"results": [{"credential": matti_sd_jwt()}]}
        }),
    ]));
    let verifier = verifier(api.clone()).await;
    let request = verifier.create_request().await.unwrap();

    let poller = StatusPoller::new(verifier.clone(), PollLimits::default());
    let handle = poller
        .start(request.transaction_id, config().polling_interval())
        .await
        .unwrap();

    let PollOutcome::Terminal(status) = handle.outcome().await else {
        panic!("expected a verdict")
    };
    let outcome = VerificationOutcome::from(status);
    assert_eq!(outcome.result, Some(VerificationResult::Success));
    assert_eq!(
        serde_json::Value::Object(outcome.attributes),
        json!({"given_name": "Matti", "family_name": "Meikäläinen"})
    );
    assert!(outcome.warnings.is_empty());
    assert_eq!(
        poller.state(request.transaction_id).await,
        PollState::Terminal
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(api.status_requests.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn failed_verification_is_terminal() {
    let api = Arc::new(MockApi::with_statuses([json!({
        "verificationResult": false,
        "policyResults": {"results": [{
            "credential": "header.payload.sig~",
            "policies": [{"policy": "signature", "description": "Checks the signature", "is_success": false}]
        }]}
    })]));
    let verifier = verifier(api).await;
    let request = verifier.create_request().await.unwrap();

    let poller = StatusPoller::new(verifier.clone(), PollLimits::default());
    let outcome = poller
        .start(request.transaction_id, Duration::from_millis(100))
        .await
        .unwrap()
        .outcome()
        .await;

    let PollOutcome::Terminal(status) = outcome else {
        panic!("expected a verdict")
    };
    let outcome = VerificationOutcome::from(status);
    assert_eq!(outcome.result, Some(VerificationResult::Failed));
    assert!(outcome.attributes.is_empty());
    assert!(!outcome.policies[0].is_success);
}

#[tokio::test(start_paused = true)]
async fn pending_session_is_abandoned_after_the_timeout() {
    let api = Arc::new(MockApi::with_statuses([json!({"id": REMOTE_STATE})]));
    let verifier = verifier(api.clone()).await;
    let request = verifier.create_request().await.unwrap();

    let limits = PollLimits {
        timeout: Some(Duration::from_secs(1)),
        max_attempts: None,
    };
    let poller = StatusPoller::new(verifier.clone(), limits);
    let outcome = poller
        .start(request.transaction_id, Duration::from_millis(300))
        .await
        .unwrap()
        .outcome()
        .await;

    assert_eq!(outcome, PollOutcome::Abandoned(AbandonReason::Timeout));
    assert_eq!(api.status_requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn outcome_reads_the_current_status() {
    let api = Arc::new(MockApi::with_statuses([json!({
        "verificationResult": true,
        "policyResults": {"results": [{"credential": matti_sd_jwt()}]}
    })]));
    let verifier = verifier(api).await;
    let request = verifier.create_request().await.unwrap();

    let outcome = verifier.outcome(request.transaction_id).await.unwrap();
    assert_eq!(outcome.result, Some(VerificationResult::Success));
    assert_eq!(outcome.attributes["given_name"], json!("Matti"));
}
