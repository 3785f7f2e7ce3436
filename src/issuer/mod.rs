use std::sync::Arc;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::{
    config::BaseUrl,
    core::{
        exchange::{ExchangeClient, ExchangeRequest},
        selective_disclosure::SelectiveDisclosureSpec,
    },
    error::ExchangeError,
};

use registry::{Organization, Role, RoleRegistry};

pub mod registry;

/// Tokens in a [Mapping] that the remote issuance service replaces while constructing the
/// credential.
pub mod placeholder {
    /// A fresh UUID.
    pub const UUID: &str = "<uuid>";
    /// The DID of the issuer.
    pub const ISSUER_DID: &str = "<issuerDid>";
    /// The DID of the holder receiving the credential.
    pub const SUBJECT_DID: &str = "<subjectDid>";
    /// Time of issuance.
    pub const TIMESTAMP: &str = "<timestamp>";

    /// Time of issuance plus `days` days.
    pub fn timestamp_in_days(days: u32) -> String {
        format!("<timestamp-in:{days}d>")
    }
}

/// Days until expiry of credentials built with [Mapping::standard].
const STANDARD_VALIDITY_DAYS: u32 = 31;

/// Credential fields filled in by the issuance service, usually with [placeholder]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mapping(pub serde_json::Map<String, Json>);

impl Mapping {
    /// The mapping of a W3C credential: fresh id, issuer profile, subject id and a validity
    /// of 31 days.
    ///
    /// `subject` is the holder's DID, or [placeholder::SUBJECT_DID] when the wallet's DID is
    /// only known at issuance.
    pub fn standard(issuer_name: &str, subject: &str) -> Self {
        Self::default()
            .with_field("id", placeholder::UUID)
            .with_field(
                "issuer",
                json!({
                    "type": ["Profile"],
                    "id": placeholder::ISSUER_DID,
                    "name": issuer_name,
                }),
            )
            .with_field("credentialSubject", json!({ "id": subject }))
            .with_field("issuanceDate", placeholder::TIMESTAMP)
            .with_field(
                "expirationDate",
                placeholder::timestamp_in_days(STANDARD_VALIDITY_DAYS),
            )
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Json>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }
}

/// Body of `POST {issuer_api}/openid4vc/sdjwt/issue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    pub issuer_key: Json,
    pub issuer_did: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_configuration_id: Option<String>,
    pub credential_data: Json,
    pub mapping: Mapping,
    pub selective_disclosure: SelectiveDisclosureSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_method: Option<String>,
}

/// What is being issued, independent of who issues it.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialTemplate {
    pub credential_configuration_id: Option<String>,
    pub credential_data: Json,
    pub mapping: Mapping,
    pub selective_disclosure: SelectiveDisclosureSpec,
    pub authentication_method: Option<String>,
}

impl CredentialTemplate {
    pub fn new(credential_data: Json, mapping: Mapping) -> Self {
        Self {
            credential_configuration_id: None,
            credential_data,
            mapping,
            selective_disclosure: SelectiveDisclosureSpec::default(),
            authentication_method: None,
        }
    }

    pub fn with_configuration_id(mut self, id: impl Into<String>) -> Self {
        self.credential_configuration_id = Some(id.into());
        self
    }

    pub fn with_selective_disclosure(mut self, spec: SelectiveDisclosureSpec) -> Self {
        self.selective_disclosure = spec;
        self
    }

    /// E.g. `PRE_AUTHORIZED`.
    pub fn with_authentication_method(mut self, method: impl Into<String>) -> Self {
        self.authentication_method = Some(method.into());
        self
    }
}

/// A credential offer produced by the issuance service, for the wallet to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialOffer {
    uri: String,
}

impl CredentialOffer {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    /// The offer as returned, typically `openid-credential-offer://?credential_offer=...`.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The `credential_offer` (or `credential_offer_uri`) query parameter, if the offer
    /// embeds one.
    pub fn embedded_offer(&self) -> Option<String> {
        let url = Url::parse(&self.uri).ok()?;
        let pairs: Vec<_> = url.query_pairs().collect();
        ["credential_offer", "credential_offer_uri"]
            .into_iter()
            .find_map(|name| {
                pairs
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| value.clone().into_owned())
            })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnboardResponse {
    issuer_key: Json,
    issuer_did: String,
}

/// Public details of the issuing organization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuerProfile {
    pub name: String,
    pub url: Option<String>,
    pub image: Option<String>,
}

/// Issues credentials through the remote issuance service.
#[derive(Debug, Clone)]
pub struct Issuer {
    exchange: ExchangeClient,
    registry: Arc<dyn RoleRegistry + Send + Sync>,
    issuer_api: BaseUrl,
    profile: IssuerProfile,
    onboarding: Arc<Mutex<()>>,
}

impl Issuer {
    pub fn new(
        exchange: ExchangeClient,
        registry: Arc<dyn RoleRegistry + Send + Sync>,
        issuer_api: BaseUrl,
        profile: IssuerProfile,
    ) -> Self {
        Self {
            exchange,
            registry,
            issuer_api,
            profile,
            onboarding: Arc::default(),
        }
    }

    /// The issuer organization, onboarded with the issuance service on first use.
    ///
    /// Onboarding generates a secp256k1 JWK and a `did:jwk` remotely; the result is kept in the
    /// registry. Concurrent first calls onboard once.
    pub async fn ensure_onboarded(&self) -> Result<Organization, ExchangeError> {
        let _onboarding = self.onboarding.lock().await;
        if let Some(organization) = self.registry.organization(Role::Issuer).await? {
            if organization.did.is_some() {
                return Ok(organization);
            }
        }

        let url = self.issuer_api.endpoint(["onboard", "issuer"])?;
        let body = json!({
            "key": {
                "backend": "jwk",
                "keyType": "secp256k1"
            },
            "did": {
                "method": "jwk"
            }
        });
        let onboarded: OnboardResponse = self
            .exchange
            .send_json(&ExchangeRequest::post_json(url, &body)?)
            .await?;

        let organization = Organization {
            name: self.profile.name.clone(),
            role: Role::Issuer,
            key: onboarded.issuer_key,
            did: Some(onboarded.issuer_did),
            url: self.profile.url.clone(),
            image: self.profile.image.clone(),
        };
        self.registry.store(organization.clone()).await?;
        info!(did = ?organization.did, "onboarded issuer");

        Ok(organization)
    }

    /// A DID generated by the issuance service for a sample holder.
    pub async fn example_holder_did(&self) -> Result<String, ExchangeError> {
        let issuer = self.ensure_onboarded().await?;
        let key = serde_json::to_string(&issuer.key)
            .map_err(|e| ExchangeError::Transport(e.into()))?;
        let url = self.issuer_api.endpoint(["example-did"])?;
        let request = ExchangeRequest::get(url).try_with_header("key", &key)?;
        let did = self.exchange.send_text(&request).await?;
        Ok(did.trim().to_owned())
    }

    /// Build the issuance request for the onboarded issuer.
    pub fn issue_request(
        &self,
        issuer: &Organization,
        template: CredentialTemplate,
    ) -> Result<IssueRequest> {
        let Some(issuer_did) = issuer.did.clone() else {
            bail!("issuer '{}' has no DID", issuer.name)
        };
        Ok(IssueRequest {
            issuer_key: issuer.key.clone(),
            issuer_did,
            credential_configuration_id: template.credential_configuration_id,
            credential_data: template.credential_data,
            mapping: template.mapping,
            selective_disclosure: template.selective_disclosure,
            authentication_method: template.authentication_method,
        })
    }

    /// Issue a credential and return the offer for the wallet.
    pub async fn issue(
        &self,
        template: CredentialTemplate,
    ) -> Result<CredentialOffer, ExchangeError> {
        let issuer = self.ensure_onboarded().await?;
        let body = self.issue_request(&issuer, template)?;
        let url = self.issuer_api.endpoint(["openid4vc", "sdjwt", "issue"])?;

        let offer = self
            .exchange
            .send_text(&ExchangeRequest::post_json(url, &body)?)
            .await?;
        let offer = offer.trim();
        if offer.is_empty() {
            return Err(ExchangeError::invalid_response(
                "issuance service returned an empty credential offer",
            ));
        }
        debug!(offer, "issued credential offer");

        Ok(CredentialOffer::new(offer))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn standard_mapping_uses_placeholders() {
        let mapping = Mapping::standard("Kela", placeholder::SUBJECT_DID);
        assert_eq!(
            serde_json::to_value(&mapping).unwrap(),
            json!({
                "id": "<uuid>",
                "issuer": {"type": ["Profile"], "id": "<issuerDid>", "name": "Kela"},
                "credentialSubject": {"id": "<subjectDid>"},
                "issuanceDate": "<timestamp>",
                "expirationDate": "<timestamp-in:31d>"
            })
        );
    }

    #[test]
    fn embedded_offer_is_extracted() {
        let offer = CredentialOffer::new(
            "openid-credential-offer://?credential_offer=%7B%22grants%22%3A%7B%7D%7D",
        );
        assert_eq!(offer.embedded_offer().as_deref(), Some(r#"{"grants":{}}"#));

        let offer = CredentialOffer::new(
            "openid-credential-offer://?credential_offer_uri=https%3A%2F%2Fissuer.example.com%2Foffer%2F1",
        );
        assert_eq!(
            offer.embedded_offer().as_deref(),
            Some("https://issuer.example.com/offer/1")
        );

        assert_eq!(CredentialOffer::new("not a uri").embedded_offer(), None);
    }

    #[test]
    fn issue_request_serializes_in_camel_case() {
        let request = IssueRequest {
            issuer_key: json!({"type": "jwk"}),
            issuer_did: "did:jwk:abc".to_owned(),
            credential_configuration_id: Some("PensionCredential_vc+sd-jwt".to_owned()),
            credential_data: json!({"credentialSubject": {}}),
            mapping: Mapping::default(),
            selective_disclosure: SelectiveDisclosureSpec::build(["Person.givenName"]),
            authentication_method: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["issuerDid"], json!("did:jwk:abc"));
        assert_eq!(
            value["credentialConfigurationId"],
            json!("PensionCredential_vc+sd-jwt")
        );
        assert!(value.get("authenticationMethod").is_none());
        assert_eq!(
            value["selectiveDisclosure"]["fields"]["Person"]["children"]["fields"]["givenName"]
                ["sd"],
            json!(true)
        );
    }
}
