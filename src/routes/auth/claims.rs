use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Claims {
    pub id: String, // user UUID
    pub email: String,
    pub exp: usize, // expiration (as UNIX timestamp)
    pub iss: String,
    pub aud: String,
    pub token_use: TokenUse,
}

#[cfg(test)]
impl Claims {
    pub fn for_tests(user_id: uuid::Uuid) -> Self {
        Claims {
            id: user_id.to_string(),
            email: "owner@example.test".into(),
            exp: (std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_secs()
                + 3600) as usize,
            iss: "openpolicy-test".into(),
            aud: "openpolicy-app".into(),
            token_use: TokenUse::Access,
        }
    }
}
