use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::RoyaltyError;

/// Grants every permission.
pub const WILDCARD_PERMISSION: &str = "*:*";

/// Permission strings gating royalty actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "royalties:editor_confirm")]
    EditorConfirm,
    #[serde(rename = "royalties:manager_approve")]
    ManagerApprove,
    #[serde(rename = "royalties:finance_approve")]
    FinanceApprove,
    #[serde(rename = "royalties:mark_paid")]
    MarkPaid,
    #[serde(rename = "royalties:rules_manage")]
    RulesManage,
    #[serde(rename = "royalties:calculate")]
    Calculate,
    #[serde(rename = "royalties:void")]
    Void,
}

impl Permission {
    pub const fn as_str(self) -> &'static str {
        match self {
            Permission::EditorConfirm => "royalties:editor_confirm",
            Permission::ManagerApprove => "royalties:manager_approve",
            Permission::FinanceApprove => "royalties:finance_approve",
            Permission::MarkPaid => "royalties:mark_paid",
            Permission::RulesManage => "royalties:rules_manage",
            Permission::Calculate => "royalties:calculate",
            Permission::Void => "royalties:void",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated caller as forwarded by the identity gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub user_id: String,
    pub email: String,
    pub permissions: BTreeSet<String>,
}

impl Actor {
    pub fn new<I, P>(user_id: impl Into<String>, email: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            permissions: permissions
                .into_iter()
                .map(Into::into)
                .map(|permission: String| permission.trim().to_string())
                .filter(|permission| !permission.is_empty())
                .collect(),
        }
    }

    pub fn holds(&self, permission: Permission) -> bool {
        self.permissions.contains(WILDCARD_PERMISSION)
            || self.permissions.contains(permission.as_str())
    }

    pub fn require(&self, permission: Permission) -> Result<(), RoyaltyError> {
        if self.holds(permission) {
            Ok(())
        } else {
            Err(RoyaltyError::PermissionDenied { permission })
        }
    }
}
