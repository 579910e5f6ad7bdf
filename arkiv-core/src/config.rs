//! Service configuration.
//!
//! All knobs are environment-driven with conservative defaults, so the
//! service runs unconfigured in development and picks up deployment settings
//! without a config file.

/// Runtime configuration shared by the pipeline components.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Connect/read timeout for external asset fetches, in milliseconds.
    pub asset_timeout_ms: u64,
    /// Hard cap on a single fetched asset body, in bytes.
    pub asset_max_bytes: u64,
    /// Domains external assets may be fetched from. Empty list means no
    /// external fetches are permitted at all.
    pub asset_allowed_domains: Vec<String>,
    /// Producer string written into generated PDFs.
    pub pdf_producer: String,
    /// Address the HTTP server binds to.
    pub bind_addr: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            asset_timeout_ms: 5_000,
            asset_max_bytes: 5 * 1024 * 1024,
            asset_allowed_domains: Vec::new(),
            pdf_producer: format!("arkiv {}", env!("CARGO_PKG_VERSION")),
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Build a configuration from `ARKIV_*` environment variables, falling
    /// back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            asset_timeout_ms: env_parse("ARKIV_ASSET_TIMEOUT_MS", defaults.asset_timeout_ms),
            asset_max_bytes: env_parse("ARKIV_ASSET_MAX_BYTES", defaults.asset_max_bytes),
            asset_allowed_domains: std::env::var("ARKIV_ASSET_ALLOWED_DOMAINS")
                .map(|raw| parse_domain_list(&raw))
                .unwrap_or_default(),
            pdf_producer: std::env::var("ARKIV_PDF_PRODUCER").unwrap_or(defaults.pdf_producer),
            bind_addr: std::env::var("ARKIV_BIND_ADDR").unwrap_or(defaults.bind_addr),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Split a comma-separated domain list, trimming and case-folding entries.
fn parse_domain_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.asset_timeout_ms, 5_000);
        assert_eq!(config.asset_max_bytes, 5 * 1024 * 1024);
        assert!(config.asset_allowed_domains.is_empty());
        assert!(config.pdf_producer.starts_with("arkiv "));
    }

    #[test]
    fn test_parse_domain_list() {
        let domains = parse_domain_list("CDN.Example.com, assets.example.org ,, ");
        assert_eq!(domains, vec!["cdn.example.com", "assets.example.org"]);
    }

    #[test]
    fn test_parse_domain_list_empty() {
        assert!(parse_domain_list("").is_empty());
        assert!(parse_domain_list(" , ").is_empty());
    }
}
