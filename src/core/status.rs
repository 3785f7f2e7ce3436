use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use super::disclosure::{decode_disclosures, DecodedCredential};

/// State of a remote verification session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_result: Option<VerificationResult>,
    #[serde(default)]
    pub policy_results: PolicyResults,
    /// Remaining session fields, kept for diagnosis.
    #[serde(flatten)]
    pub other: Map<String, Json>,
}

impl VerificationStatus {
    /// Whether the remote verifier has reached a verdict.
    pub fn is_terminal(&self) -> bool {
        self.verification_result
            .is_some_and(|result| result != VerificationResult::Pending)
    }

    /// The result of the first policy that ran against the submitted credential.
    pub fn first_policy_result(&self) -> Option<&PolicyResult> {
        self.policy_results.results.first()
    }
}

/// Verdict of a verification session.
///
/// The verifier reports either a boolean or a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "RawVerificationResult")]
pub enum VerificationResult {
    Pending,
    Success,
    Failed,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawVerificationResult {
    Bool(bool),
    Text(String),
}

impl TryFrom<RawVerificationResult> for VerificationResult {
    type Error = String;

    fn try_from(raw: RawVerificationResult) -> Result<Self, Self::Error> {
        match raw {
            RawVerificationResult::Bool(true) => Ok(Self::Success),
            RawVerificationResult::Bool(false) => Ok(Self::Failed),
            RawVerificationResult::Text(text) => match text.to_ascii_lowercase().as_str() {
                "pending" => Ok(Self::Pending),
                "success" | "true" => Ok(Self::Success),
                "failed" | "failure" | "false" => Ok(Self::Failed),
                _ => Err(format!("unknown verification result '{text}'")),
            },
        }
    }
}

impl std::fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Success => f.write_str("success"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyResults {
    #[serde(default)]
    pub results: Vec<PolicyResult>,
}

/// Output of one policy run by the remote verifier.
///
/// Depending on the policy, the submitted credential is reported either as a raw SD-JWT or as
/// an already decoded subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolicyResult {
    Credential {
        credential: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        policies: Vec<PolicyCheck>,
    },
    Subject {
        #[serde(rename = "credentialSubject")]
        credential_subject: Map<String, Json>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        policies: Vec<PolicyCheck>,
    },
}

impl PolicyResult {
    pub fn policies(&self) -> &[PolicyCheck] {
        match self {
            Self::Credential { policies, .. } | Self::Subject { policies, .. } => policies,
        }
    }

    /// Flat attribute map of the reported credential, with any disclosure warnings.
    pub fn attributes(&self) -> (Map<String, Json>, DecodedCredential) {
        match self {
            Self::Credential { credential, .. } => {
                let decoded = decode_disclosures(credential);
                (decoded.claims(), decoded)
            }
            Self::Subject {
                credential_subject, ..
            } => (credential_subject.clone(), DecodedCredential::default()),
        }
    }
}

/// One policy check reported within a [PolicyResult].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_success: bool,
}
