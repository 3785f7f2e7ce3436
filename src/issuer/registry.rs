use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::Mutex;

/// Role of an organization taking part in the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Issuer,
    Verifier,
}

/// An organization with its DID and signing key.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    pub role: Role,
    /// Signing key as a JWK, managed by the remote issuance service.
    pub key: Json,
    pub did: Option<String>,
    pub url: Option<String>,
    pub image: Option<String>,
}

impl Debug for Organization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Organization")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("did", &self.did)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Storage for organizations by role. One organization per role.
#[async_trait]
pub trait RoleRegistry: Debug {
    async fn organization(&self, role: Role) -> Result<Option<Organization>>;

    /// Store an organization, replacing any with the same role.
    async fn store(&self, organization: Organization) -> Result<()>;
}

/// A local in-memory registry; organizations are lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    organizations: Arc<Mutex<BTreeMap<Role, Organization>>>,
}

#[async_trait]
impl RoleRegistry for MemoryRegistry {
    async fn organization(&self, role: Role) -> Result<Option<Organization>> {
        Ok(self.organizations.lock().await.get(&role).cloned())
    }

    async fn store(&self, organization: Organization) -> Result<()> {
        self.organizations
            .lock()
            .await
            .insert(organization.role, organization);
        Ok(())
    }
}
