use std::env;

use crate::utils::jwt::JwtKeys;

pub struct Config {
    pub database_url: String,
    pub frontend_origin: String,
    /// Origin serving published documents, used to build public links.
    pub public_origin: String,
    /// CNAME target customers must point custom domains at.
    pub domain_cname_target: String,
    pub doh_endpoint: String,
    pub deploy_hook_url: Option<String>,
    pub jwt: JwtSettings,
    pub stripe: StripeSettings,
    pub ai: AiSettings,
    pub storage: StorageSettings,
}

pub struct JwtSettings {
    pub keys: JwtKeys,
    pub issuer: String,
    pub audience: String,
}

pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
}

pub struct AiSettings {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout_secs: u64,
}

pub struct StorageSettings {
    pub upload_url: String,
    pub public_url: String,
    pub signing_secret: String,
}

const DEFAULT_DOH_ENDPOINT: &str = "https://cloudflare-dns.com/dns-query";
const DEFAULT_AI_REQUEST_TIMEOUT_SECS: u64 = 30;

fn optional(var: &str) -> Option<String> {
    env::var(var).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok(); // Load .env file

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let frontend_origin = env::var("FRONTEND_ORIGIN").expect("FRONTEND_ORIGIN must be set");
        let public_origin = env::var("PUBLIC_ORIGIN").expect("PUBLIC_ORIGIN must be set");
        let domain_cname_target =
            env::var("DOMAIN_CNAME_TARGET").expect("DOMAIN_CNAME_TARGET must be set");

        Config {
            database_url,
            frontend_origin,
            public_origin,
            domain_cname_target,
            doh_endpoint: optional("DOH_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_DOH_ENDPOINT.to_string()),
            deploy_hook_url: optional("DEPLOY_HOOK_URL"),
            jwt: JwtSettings {
                keys: JwtKeys::from_env().expect("JWT_SECRET must be set and strong enough"),
                issuer: env::var("JWT_ISSUER").expect("JWT_ISSUER must be set"),
                audience: env::var("JWT_AUDIENCE").expect("JWT_AUDIENCE must be set"),
            },
            stripe: StripeSettings {
                secret_key: env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY must be set"),
                webhook_secret: env::var("STRIPE_WEBHOOK_SECRET")
                    .expect("STRIPE_WEBHOOK_SECRET must be set"),
            },
            ai: AiSettings {
                api_base: env::var("AI_API_BASE").expect("AI_API_BASE must be set"),
                api_key: env::var("AI_API_KEY").expect("AI_API_KEY must be set"),
                model: env::var("AI_MODEL").expect("AI_MODEL must be set"),
                request_timeout_secs: optional("AI_REQUEST_TIMEOUT_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_AI_REQUEST_TIMEOUT_SECS),
            },
            storage: StorageSettings {
                upload_url: env::var("STORAGE_UPLOAD_URL").expect("STORAGE_UPLOAD_URL must be set"),
                public_url: env::var("STORAGE_PUBLIC_URL").expect("STORAGE_PUBLIC_URL must be set"),
                signing_secret: env::var("STORAGE_SIGNING_SECRET")
                    .expect("STORAGE_SIGNING_SECRET must be set"),
            },
        }
    }

    /// Fixed configuration for unit tests; no environment reads.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            database_url: "postgres://localhost/openpolicy_test".into(),
            frontend_origin: "https://app.example.test".into(),
            public_origin: "https://sites.example.test".into(),
            domain_cname_target: "sites.openpolicy.dev".into(),
            doh_endpoint: DEFAULT_DOH_ENDPOINT.into(),
            deploy_hook_url: None,
            jwt: JwtSettings {
                keys: JwtKeys::from_secret("0123456789abcdef0123456789abcdef")
                    .expect("test secret is valid"),
                issuer: "openpolicy-test".into(),
                audience: "openpolicy-app".into(),
            },
            stripe: StripeSettings {
                secret_key: "sk_test_dummy".into(),
                webhook_secret: "whsec_test".into(),
            },
            ai: AiSettings {
                api_base: "https://ai.example.test/v1".into(),
                api_key: "sk-test".into(),
                model: "gpt-4o-mini".into(),
                request_timeout_secs: 1,
            },
            storage: StorageSettings {
                upload_url: "https://storage.internal/uploads".into(),
                public_url: "https://cdn.example.test".into(),
                signing_secret: "storage-signing-secret".into(),
            },
        }
    }
}
