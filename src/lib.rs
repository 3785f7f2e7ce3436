//! Issuance and verification of SD-JWT verifiable credentials through a remote OpenID4VC
//! identity platform.
//!
//! The remote service does the cryptography. This crate keeps a bearer token valid for the
//! lifetime of the process, correlates local transactions with remote verification sessions,
//! polls those sessions until the verifier reaches a verdict, and flattens the presented
//! SD-JWT into an attribute map.
//!
//! # Verifier Usage
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use vc_exchange::{
//!     config::Config,
//!     core::{exchange::ExchangeClient, util::ReqwestClient},
//!     verifier::{
//!         poller::{PollLimits, PollOutcome, StatusPoller},
//!         session::MemoryStore,
//!         Verifier, VerificationOutcome,
//!     },
//! };
//!
//! let config = Config::load("config.json")?;
//! let exchange = ExchangeClient::connect(Arc::new(ReqwestClient::new()?), &config).await?;
//!
//! let verifier = Arc::new(
//!     Verifier::builder()
//!         .with_config(&config)
//!         .with_exchange_client(exchange)
//!         .with_transaction_store(Arc::new(MemoryStore::default()))
//!         .build()?,
//! );
//!
//! // Present the request to the wallet (e.g., as a QR code).
//! let request = verifier.create_request().await?;
//!
//! // Poll the remote session until the verifier reaches a verdict.
//! let poller = StatusPoller::new(verifier.clone(), PollLimits::from_config(&config));
//! let handle = poller
//!     .start(request.transaction_id, config.polling_interval())
//!     .await?;
//! if let PollOutcome::Terminal(status) = handle.outcome().await {
//!     let outcome = VerificationOutcome::from(status);
//!     render(outcome.result, &outcome.attributes);
//! }
//! ```
//!
//! # Issuer Usage
//!
//! ```ignore
//! use vc_exchange::{
//!     core::selective_disclosure::SelectiveDisclosureSpec,
//!     issuer::{placeholder, registry::MemoryRegistry, CredentialTemplate, Issuer, Mapping},
//! };
//!
//! let issuer = Issuer::new(exchange, Arc::new(MemoryRegistry::default()), config.issuer_api.clone(), profile);
//! let template = CredentialTemplate::new(credential_data, Mapping::standard("Kela", placeholder::SUBJECT_DID))
//!     .with_selective_disclosure(SelectiveDisclosureSpec::build(&config.disclosable_claims));
//! let offer = issuer.issue(template).await?;
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod issuer;
pub mod verifier;

pub use error::ExchangeError;
