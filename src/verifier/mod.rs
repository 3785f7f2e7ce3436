use std::{fmt::Debug, sync::Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value as Json};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::{
    config::{BaseUrl, Config},
    core::{
        disclosure::DisclosureWarning,
        exchange::{ExchangeClient, ExchangeRequest},
        status::{PolicyCheck, VerificationResult, VerificationStatus},
    },
    error::ExchangeError,
};

use poller::StatusSource;
use request_builder::PresentationRequestBuilder;
use session::TransactionStore;

pub mod poller;
pub mod request_builder;
pub mod session;

/// A presentation request handed to the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresentationRequest {
    /// Local transaction id, used to poll for the result.
    pub transaction_id: Uuid,
    /// URI the wallet resolves, usually shown as a QR code.
    pub request_uri: Url,
}

/// Verdict of a finished verification, ready to be rendered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationOutcome {
    pub result: Option<VerificationResult>,
    /// Claims of the presented credential, empty if none was reported.
    pub attributes: Map<String, Json>,
    pub policies: Vec<PolicyCheck>,
    pub warnings: Vec<DisclosureWarning>,
    pub status: VerificationStatus,
}

impl From<VerificationStatus> for VerificationOutcome {
    fn from(status: VerificationStatus) -> Self {
        let (attributes, policies, warnings) = match status.first_policy_result() {
            Some(policy_result) => {
                let (attributes, decoded) = policy_result.attributes();
                (
                    attributes,
                    policy_result.policies().to_vec(),
                    decoded.warnings,
                )
            }
            None => Default::default(),
        };
        Self {
            result: status.verification_result,
            attributes,
            policies,
            warnings,
            status,
        }
    }
}

/// Requests credential presentations from the remote verifier and tracks their sessions.
#[derive(Debug, Clone)]
pub struct Verifier {
    exchange: ExchangeClient,
    transactions: Arc<dyn TransactionStore + Send + Sync>,
    verifier_api: BaseUrl,
    verifier_base: BaseUrl,
    request: PresentationRequestBuilder,
}

impl Verifier {
    /// Build a new verifier.
    pub fn builder() -> VerifierBuilder {
        VerifierBuilder::default()
    }

    pub fn transactions(&self) -> &Arc<dyn TransactionStore + Send + Sync> {
        &self.transactions
    }

    /// Start a presentation: create a transaction, ask the remote verifier for a request and
    /// bind the transaction to the session named by the request's `state` parameter.
    pub async fn create_request(&self) -> Result<PresentationRequest, ExchangeError> {
        let transaction = self.transactions.create().await?;
        let verify_url = self.verifier_api.endpoint(["openid4vc", "verify"])?;
        let request = self
            .request
            .build(transaction.id, verify_url, &self.verifier_base)?;

        let body = self.exchange.send_text(&request).await?;
        let request_uri = Url::parse(body.trim()).map_err(|e| {
            ExchangeError::invalid_response(format!("verifier returned no request URI: {e}"))
        })?;
        let Some(state) = request_uri
            .query_pairs()
            .find_map(|(key, value)| (key == "state").then(|| value.into_owned()))
        else {
            return Err(ExchangeError::invalid_response(
                "request URI carries no state parameter",
            ));
        };

        self.transactions.bind(transaction.id, state).await?;
        info!(id = %transaction.id, "created presentation request");

        Ok(PresentationRequest {
            transaction_id: transaction.id,
            request_uri,
        })
    }

    /// Fetch the remote session status of a transaction.
    ///
    /// Fails with [ExchangeError::UnknownTransaction] if the transaction has no remote session.
    pub async fn status(&self, id: Uuid) -> Result<VerificationStatus, ExchangeError> {
        let Some(token) = self.transactions.remote_token(id).await? else {
            return Err(ExchangeError::UnknownTransaction(id));
        };
        let url = self.verifier_api.endpoint(["openid4vc", "session", &token])?;
        let status: VerificationStatus = self.exchange.send_json(&ExchangeRequest::get(url)).await?;
        debug!(%id, result = ?status.verification_result, "fetched session status");
        Ok(status)
    }

    /// Fetch the status of a transaction and extract the presented attributes.
    pub async fn outcome(&self, id: Uuid) -> Result<VerificationOutcome, ExchangeError> {
        self.status(id).await.map(Into::into)
    }
}

#[async_trait]
impl StatusSource for Verifier {
    async fn fetch_status(&self, id: Uuid) -> Result<VerificationStatus, ExchangeError> {
        self.status(id).await
    }
}

/// Builder struct for [Verifier].
#[derive(Debug, Clone, Default)]
pub struct VerifierBuilder {
    exchange: Option<ExchangeClient>,
    transactions: Option<Arc<dyn TransactionStore + Send + Sync>>,
    verifier_api: Option<BaseUrl>,
    verifier_base: Option<BaseUrl>,
    request: Option<PresentationRequestBuilder>,
}

impl VerifierBuilder {
    /// Build the verifier.
    pub fn build(self) -> Result<Verifier> {
        let Self {
            exchange,
            transactions,
            verifier_api,
            verifier_base,
            request,
        } = self;

        let Some(exchange) = exchange else {
            bail!("exchange client is required, see `with_exchange_client`")
        };

        let Some(transactions) = transactions else {
            bail!("transaction store is required, see `with_transaction_store`")
        };

        let Some(verifier_api) = verifier_api else {
            bail!("verifier API is required, see `with_verifier_api`")
        };

        let Some(verifier_base) = verifier_base else {
            bail!("verifier base URL is required, see `with_verifier_base`")
        };

        let Some(request) = request else {
            bail!("presentation request is required, see `with_presentation_request`")
        };

        Ok(Verifier {
            exchange,
            transactions,
            verifier_api,
            verifier_base,
            request,
        })
    }

    /// Take the API addresses and the requested credential from the configuration.
    pub fn with_config(self, config: &Config) -> Self {
        let request =
            PresentationRequestBuilder::new(&config.credential_type, &config.credential_format)
                .with_vct_base(config.issuer_api.clone());
        self.with_verifier_api(config.verifier_api.clone())
            .with_verifier_base(config.verifier_base.clone())
            .with_presentation_request(request)
    }

    pub fn with_exchange_client(mut self, exchange: ExchangeClient) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// Set the [TransactionStore] correlating local transactions with remote sessions.
    pub fn with_transaction_store(
        mut self,
        transactions: Arc<dyn TransactionStore + Send + Sync>,
    ) -> Self {
        self.transactions = Some(transactions);
        self
    }

    pub fn with_verifier_api(mut self, verifier_api: BaseUrl) -> Self {
        self.verifier_api = Some(verifier_api);
        self
    }

    /// Set the public address the wallet is redirected to once it has responded.
    pub fn with_verifier_base(mut self, verifier_base: BaseUrl) -> Self {
        self.verifier_base = Some(verifier_base);
        self
    }

    pub fn with_presentation_request(mut self, request: PresentationRequestBuilder) -> Self {
        self.request = Some(request);
        self
    }
}
