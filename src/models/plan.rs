use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Paid,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Paid => "paid",
        }
    }

    pub fn is_free(self) -> bool {
        matches!(self, PlanTier::Free)
    }

    pub fn from_is_free(is_free: bool) -> Self {
        if is_free {
            PlanTier::Free
        } else {
            PlanTier::Paid
        }
    }
}
