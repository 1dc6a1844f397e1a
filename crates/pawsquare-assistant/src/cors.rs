use axum::http::HeaderMap;

/// Origins always allowed, in preference order. The first entry doubles as
/// the fail-closed fallback for unknown origins (never a wildcard).
const STATIC_ALLOWED_ORIGINS: &[&str] = &["https://pawsquare.app", "http://localhost:5173"];

/// Hosted preview/staging deployments live under these suffixes.
const TRUSTED_SUFFIXES: &[&str] = &[".lovable.app", ".lovable.dev"];

pub const ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";
pub const ALLOW_METHODS: &str = "POST, OPTIONS";

/// Per-request CORS policy for the assistant endpoint.
#[derive(Debug, Clone, Default)]
pub struct CorsConfig {
    /// Optional custom domain (apex, no scheme), e.g. `pets.example.com`
    custom_domain: Option<String>,
    /// Optional derived project domain (no scheme)
    project_domain: Option<String>,
}

impl CorsConfig {
    pub fn new(custom_domain: Option<String>, project_domain: Option<String>) -> Self {
        Self {
            custom_domain,
            project_domain,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("PAWSQUARE_CUSTOM_DOMAIN").ok().filter(|s| !s.is_empty()),
            std::env::var("PAWSQUARE_PROJECT_DOMAIN").ok().filter(|s| !s.is_empty()),
        )
    }

    /// Compute `Access-Control-Allow-Origin` for a request. Known origins are
    /// echoed back; anything else falls back to the first static origin.
    pub fn allow_origin(&self, origin: Option<&str>) -> String {
        if let Some(origin) = origin {
            if STATIC_ALLOWED_ORIGINS.contains(&origin) {
                return origin.to_string();
            }
            if TRUSTED_SUFFIXES.iter().any(|suffix| origin.ends_with(suffix)) {
                return origin.to_string();
            }
            for domain in [&self.custom_domain, &self.project_domain].into_iter().flatten() {
                if origin == format!("https://{domain}") {
                    return origin.to_string();
                }
            }
        }
        STATIC_ALLOWED_ORIGINS[0].to_string()
    }

    /// The policy computed from a request's headers.
    pub fn allow_origin_for(&self, headers: &HeaderMap) -> String {
        let origin = headers
            .get(axum::http::header::ORIGIN)
            .and_then(|v| v.to_str().ok());
        self.allow_origin(origin)
    }
}

/// Append the assistant endpoint's CORS headers to a response.
pub fn apply_cors(headers: &mut HeaderMap, allow_origin: &str) {
    use axum::http::{HeaderValue, header};

    if let Ok(value) = HeaderValue::from_str(allow_origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trusted_suffix_origins_are_echoed() {
        let cors = CorsConfig::default();
        assert_eq!(
            cors.allow_origin(Some("https://foo.lovable.app")),
            "https://foo.lovable.app"
        );
        assert_eq!(
            cors.allow_origin(Some("https://preview--pawsquare.lovable.dev")),
            "https://preview--pawsquare.lovable.dev"
        );
    }

    #[test]
    fn unknown_origins_fall_back_to_first_static_origin() {
        let cors = CorsConfig::default();
        assert_eq!(
            cors.allow_origin(Some("https://evil.example.com")),
            "https://pawsquare.app"
        );
        assert_eq!(cors.allow_origin(None), "https://pawsquare.app");
    }

    #[test]
    fn static_and_configured_domains_are_echoed() {
        let cors = CorsConfig::new(
            Some("pets.example.com".into()),
            Some("pawsquare-prod.example.dev".into()),
        );
        assert_eq!(
            cors.allow_origin(Some("http://localhost:5173")),
            "http://localhost:5173"
        );
        assert_eq!(
            cors.allow_origin(Some("https://pets.example.com")),
            "https://pets.example.com"
        );
        assert_eq!(
            cors.allow_origin(Some("https://pawsquare-prod.example.dev")),
            "https://pawsquare-prod.example.dev"
        );
        // Scheme must match: only https reaches configured domains
        assert_eq!(
            cors.allow_origin(Some("http://pets.example.com")),
            "https://pawsquare.app"
        );
    }
}
