use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
    pub media_dir: String,
    pub host: String,
    pub port: u16,
    pub app_base_url: String,
    pub file_signing_secret: String,
    pub file_url_ttl_seconds: u64,
    // SMTP (optional)
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = required("JWT_SECRET")?;
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            jwt_expiry_seconds: env::var("JWT_EXPIRY_SECONDS")
                .unwrap_or_else(|_| "86400".into())
                .parse()?,
            media_dir: env::var("MEDIA_DIR").unwrap_or_else(|_| "/data/uploads".into()),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            file_signing_secret: env::var("FILE_SIGNING_SECRET")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| jwt_secret.clone()),
            file_url_ttl_seconds: env::var("FILE_URL_TTL_SECONDS")
                .unwrap_or_else(|_| "900".into())
                .parse()?,
            jwt_secret,
            smtp_host: env::var("SMTP_HOST").ok().filter(|s| !s.is_empty()),
            smtp_port: env::var("SMTP_PORT").ok().and_then(|v| v.parse().ok()),
            smtp_username: env::var("SMTP_USERNAME").ok().filter(|s| !s.is_empty()),
            smtp_password: env::var("SMTP_PASSWORD").ok().filter(|s| !s.is_empty()),
            smtp_from: env::var("SMTP_FROM").ok().filter(|s| !s.is_empty()),
        })
    }

    /// Host part of `app_base_url` without scheme, path or port.
    /// Tenant subdomains are labels directly in front of it.
    pub fn base_domain(&self) -> String {
        let after_scheme = match self.app_base_url.find("://") {
            Some(idx) => &self.app_base_url[idx + 3..],
            None => self.app_base_url.as_str(),
        };
        let host = after_scheme.split('/').next().unwrap_or(after_scheme);
        host.split(':').next().unwrap_or(host).to_lowercase()
    }

    /// Public URL for a tenant's portal, e.g. `https://acme.portal.example`.
    pub fn tenant_url(&self, subdomain: &str) -> String {
        match self.app_base_url.find("://") {
            Some(idx) => {
                let scheme = &self.app_base_url[..idx];
                let rest = &self.app_base_url[idx + 3..];
                format!("{scheme}://{subdomain}.{}", rest.trim_end_matches('/'))
            }
            None => format!("https://{subdomain}.{}", self.app_base_url.trim_end_matches('/')),
        }
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/fundportal_test".into(),
        redis_url: "redis://127.0.0.1:6379".into(),
        jwt_secret: "test-secret".into(),
        jwt_expiry_seconds: 3600,
        media_dir: std::env::temp_dir().join("fundportal-test").to_string_lossy().into_owned(),
        host: "127.0.0.1".into(),
        port: 0,
        app_base_url: "https://portal.example".into(),
        file_signing_secret: "file-secret".into(),
        file_url_ttl_seconds: 900,
        smtp_host: None,
        smtp_port: None,
        smtp_username: None,
        smtp_password: None,
        smtp_from: None,
    }
}
