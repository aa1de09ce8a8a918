// Rating Status - moderation states and the hook operation each transition fires

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::infrastructure::hooks::HookOperation;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RatingStatus {
    #[default]
    Active,
    Pending,
    Disabled,
    /// A status added through the status settings
    Custom(String),
}

impl RatingStatus {
    pub fn parse(key: &str) -> Self {
        match key.trim() {
            "active" => RatingStatus::Active,
            "pending" => RatingStatus::Pending,
            "disabled" => RatingStatus::Disabled,
            other => RatingStatus::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RatingStatus::Active => "active",
            RatingStatus::Pending => "pending",
            RatingStatus::Disabled => "disabled",
            RatingStatus::Custom(key) => key,
        }
    }

    pub fn is_built_in(&self) -> bool {
        !matches!(self, RatingStatus::Custom(_))
    }

    /// Hook operation fired when moving into this status
    pub fn hook_operation(&self) -> HookOperation {
        match self {
            RatingStatus::Active => HookOperation::Activate,
            RatingStatus::Pending => HookOperation::Pending,
            RatingStatus::Disabled => HookOperation::Disable,
            RatingStatus::Custom(_) => HookOperation::StatusChange,
        }
    }
}

impl fmt::Display for RatingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for RatingStatus {
    fn from(key: &str) -> Self {
        RatingStatus::parse(key)
    }
}

impl From<String> for RatingStatus {
    fn from(key: String) -> Self {
        RatingStatus::parse(&key)
    }
}

impl From<RatingStatus> for String {
    fn from(status: RatingStatus) -> Self {
        status.as_str().to_string()
    }
}
