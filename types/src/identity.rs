use serde::{Deserialize, Serialize};

use crate::ClientId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonInfo {
    pub id: String,
    pub version: String,
}

/// Stable identity of the current installation. Created by the host,
/// read-only to the lifecycle core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallIdentity {
    client_id: ClientId,
    addon: AddonInfo,
}

impl InstallIdentity {
    #[must_use]
    pub fn new(client_id: ClientId, addon: AddonInfo) -> Self {
        Self { client_id, addon }
    }

    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    #[must_use]
    pub fn addon(&self) -> &AddonInfo {
        &self.addon
    }
}
