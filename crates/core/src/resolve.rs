//! Image location resolution.
//!
//! The backend may answer with an absolute (Cloudinary) URL, an inline
//! base64 data URI, a path relative to its own root, or a bare upload file
//! name. Everything goes through one resolver instead of per-field checks.

use serde_json::Value;

/// Directory (relative to the backend root) that bare upload names live in.
pub const UPLOADS_DIR: &str = "static/uploads";

/// One candidate source for an image field, in priority order.
#[derive(Debug, Clone, Copy)]
pub enum Candidate<'a> {
    /// A URL or path (absolute, data URI or relative) taken as-is.
    Field(&'a str),
    /// A bare file name stored under [`UPLOADS_DIR`].
    UploadName(&'a str),
}

#[derive(Debug, Clone)]
pub struct ImageUrlResolver {
    base_url: String,
}

impl ImageUrlResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    /// Absolute http(s) URL → as-is; data URI → as-is; anything else is
    /// joined onto the base URL. Blank input resolves to nothing.
    pub fn resolve(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if is_absolute_url(raw) || is_data_uri(raw) {
            return Some(raw.to_string());
        }
        Some(format!("{}/{}", self.base_url, raw.trim_start_matches('/')))
    }

    /// The first non-empty candidate wins; later ones are not consulted.
    pub fn first_resolved<'a>(
        &self,
        candidates: impl IntoIterator<Item = Candidate<'a>>,
    ) -> Option<String> {
        candidates.into_iter().find_map(|candidate| match candidate {
            Candidate::Field(raw) if !raw.trim().is_empty() => self.resolve(raw),
            Candidate::UploadName(name) if !name.trim().is_empty() => self.resolve(&format!(
                "{}/{}",
                UPLOADS_DIR,
                name.trim().trim_start_matches('/')
            )),
            _ => None,
        })
    }

    /// Resolves `raw[key]` when it is a string.
    pub fn resolve_field(&self, raw: &Value, key: &str) -> Option<String> {
        raw.get(key).and_then(Value::as_str).and_then(|s| self.resolve(s))
    }
}

pub fn is_absolute_url(s: &str) -> bool {
    let lower = s.get(..8).unwrap_or(s).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

pub fn is_data_uri(s: &str) -> bool {
    s.starts_with("data:")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ImageUrlResolver {
        ImageUrlResolver::new("http://backend:5000/")
    }

    #[test]
    fn absolute_and_data_uris_pass_through() {
        let r = resolver();
        assert_eq!(
            r.resolve("https://res.cloudinary.com/x/a.png").as_deref(),
            Some("https://res.cloudinary.com/x/a.png")
        );
        assert_eq!(r.resolve("HTTP://host/a.png").as_deref(), Some("HTTP://host/a.png"));
        assert_eq!(
            r.resolve("data:image/png;base64,AAAA").as_deref(),
            Some("data:image/png;base64,AAAA")
        );
    }

    #[test]
    fn relative_paths_join_base_without_double_slash() {
        let r = resolver();
        assert_eq!(
            r.resolve("/static/uploads/a.png").as_deref(),
            Some("http://backend:5000/static/uploads/a.png")
        );
        assert_eq!(r.resolve("   "), None);
    }

    #[test]
    fn first_non_empty_candidate_wins() {
        let r = resolver();
        let got = r.first_resolved([
            Candidate::Field(""),
            Candidate::Field("data:image/png;base64,BBBB"),
            Candidate::UploadName("result.png"),
        ]);
        assert_eq!(got.as_deref(), Some("data:image/png;base64,BBBB"));
    }

    #[test]
    fn upload_names_live_under_uploads_dir() {
        let r = resolver();
        let got = r.first_resolved([Candidate::Field(""), Candidate::UploadName("result.png")]);
        assert_eq!(
            got.as_deref(),
            Some("http://backend:5000/static/uploads/result.png")
        );
        assert_eq!(r.first_resolved([Candidate::UploadName(" ")]), None);
    }
}
