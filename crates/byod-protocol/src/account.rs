//! Accounts service response shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub plan_attributes: Value,
}

/// A validated account, as returned by the credential-pair endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserDetails {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "organization_role")]
    pub role: String,
    #[serde(default)]
    pub org_id: i64,
    #[serde(default, rename = "apiToken")]
    pub api_token: String,
    #[serde(default)]
    pub organization: Organization,
}

impl UserDetails {
    /// Organization the account belongs to.
    pub fn org_id(&self) -> i64 {
        self.organization.id
    }

    /// Copy the nested organization id into the flat `org_id` field.
    pub fn normalized(mut self) -> Self {
        self.org_id = self.organization.id;
        self
    }
}

/// Account as returned by the bearer-token endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BearerUserDetails {
    #[serde(default, rename = "userID")]
    pub user_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub token: String,
    #[serde(default, rename = "orgID")]
    pub org_id: i64,
}

impl From<BearerUserDetails> for UserDetails {
    fn from(details: BearerUserDetails) -> Self {
        Self {
            id: details.user_id,
            name: details.name,
            email: details.email,
            username: details.username,
            status: details.status,
            role: details.role,
            org_id: details.org_id,
            api_token: details.token,
            organization: Organization {
                id: details.org_id,
                ..Organization::default()
            },
        }
    }
}
