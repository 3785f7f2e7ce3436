use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::{config::BaseUrl, core::exchange::ExchangeRequest, error::ExchangeError};

const AUTHORIZE_BASE_URL: &str = "openid4vp://authorize";
const RESPONSE_MODE: &str = "direct_post";

/// Body of `POST {verifier_api}/openid4vc/verify`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub request_credentials: Vec<RequestedCredential>,
    pub presentation_definition: PresentationDefinition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedCredential {
    pub format: String,
    pub vct: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationDefinition {
    pub id: String,
    pub input_descriptors: Vec<InputDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDescriptor {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    pub constraints: Constraints,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<ConstraintsField>,
    pub limit_disclosure: String,
}

/// A JSON path into the credential that must be presented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintsField {
    pub path: Vec<String>,
}

/// Builds the presentation request for one transaction.
#[derive(Debug, Clone)]
#[must_use]
pub struct PresentationRequestBuilder {
    credential_type: String,
    credential_format: String,
    vct_base: Option<BaseUrl>,
    purpose: Option<String>,
    field_paths: Vec<String>,
}

impl PresentationRequestBuilder {
    pub fn new(credential_type: impl Into<String>, credential_format: impl Into<String>) -> Self {
        Self {
            credential_type: credential_type.into(),
            credential_format: credential_format.into(),
            vct_base: None,
            purpose: None,
            field_paths: Vec::new(),
        }
    }

    /// Base the credential type identifier (`vct`) is resolved against, usually the issuer API.
    pub fn with_vct_base(mut self, base: BaseUrl) -> Self {
        self.vct_base = Some(base);
        self
    }

    /// Human readable reason shown by the wallet.
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    /// Require the claim at `path`, e.g. `$.credentialSubject.Pension.typeCode`.
    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_paths.push(path.into());
        self
    }

    pub fn body(&self) -> VerifyRequest {
        let vct = match &self.vct_base {
            Some(base) => format!("{}{}", base.as_str(), self.credential_type),
            None => self.credential_type.clone(),
        };
        let fields = self
            .field_paths
            .iter()
            .map(|path| ConstraintsField {
                path: vec![path.clone()],
            })
            .collect();

        VerifyRequest {
            request_credentials: vec![RequestedCredential {
                format: self.credential_format.clone(),
                vct,
            }],
            presentation_definition: PresentationDefinition {
                id: Uuid::new_v4().to_string(),
                input_descriptors: vec![InputDescriptor {
                    id: format!("{}_{}", self.credential_type, self.credential_format),
                    name: Some(self.credential_type.clone()),
                    purpose: self.purpose.clone(),
                    constraints: Constraints {
                        fields,
                        limit_disclosure: "required".to_owned(),
                    },
                }],
            },
        }
    }

    /// The request for transaction `id`, sent to `verify_url`.
    ///
    /// The wallet is redirected to `{verifier_base}/success?id=..` or `/error?id=..` when it
    /// is done.
    pub fn build(
        &self,
        id: Uuid,
        verify_url: Url,
        verifier_base: &BaseUrl,
    ) -> Result<ExchangeRequest, ExchangeError> {
        let success = redirect_uri(verifier_base, "success", id)?;
        let error = redirect_uri(verifier_base, "error", id)?;

        ExchangeRequest::post_json(verify_url, &self.body())?
            .try_with_header("Accept", "*/*")?
            .try_with_header("authorizeBaseUrl", AUTHORIZE_BASE_URL)?
            .try_with_header("responseMode", RESPONSE_MODE)?
            .try_with_header("successRedirectUri", success.as_str())?
            .try_with_header("errorRedirectUri", error.as_str())
    }
}

fn redirect_uri(base: &BaseUrl, page: &str, id: Uuid) -> Result<Url, ExchangeError> {
    let mut url = base
        .endpoint([page])
        .with_context(|| format!("unable to build the {page} redirect"))?;
    url.query_pairs_mut().append_pair("id", &id.to_string());
    Ok(url)
}
