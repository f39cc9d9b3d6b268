//! Credential extraction and classification.
//!
//! Credentials come from a named header, or for websocket upgrades from the
//! `sec-websocket-protocol` header as `"<keyword>, <credential>"`. A leading
//! `Bearer` scheme token is stripped.

use crate::context::RequestContext;

const WEBSOCKET_PROTOCOL_HEADER: &str = "sec-websocket-protocol";

/// Shape of a raw credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Three dot-separated segments.
    SignedToken,
    /// Starts with the configured opaque key prefix.
    OpaqueKey,
    Unknown,
}

/// A raw credential pulled from one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub value: String,
    pub kind: CredentialKind,
}

/// Classify a credential by shape.
pub fn classify(value: &str, opaque_prefix: &str) -> CredentialKind {
    if !opaque_prefix.is_empty() && value.starts_with(opaque_prefix) {
        return CredentialKind::OpaqueKey;
    }
    let mut segments = 0;
    for part in value.split('.') {
        if part.is_empty() {
            return CredentialKind::Unknown;
        }
        segments += 1;
    }
    if segments == 3 {
        CredentialKind::SignedToken
    } else {
        CredentialKind::Unknown
    }
}

fn strip_scheme(value: &str) -> &str {
    let trimmed = value.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => trimmed,
    }
}

/// Extracts credentials using the gateway's header conventions.
#[derive(Debug, Clone)]
pub struct CredentialExtractor {
    /// `None` disables the websocket protocol fallback.
    websocket_keyword: Option<String>,
    opaque_prefix: String,
}

impl CredentialExtractor {
    pub fn new(websocket_keyword: impl Into<String>, opaque_prefix: impl Into<String>) -> Self {
        Self {
            websocket_keyword: Some(websocket_keyword.into()),
            opaque_prefix: opaque_prefix.into(),
        }
    }

    /// Extractor that only reads the named header.
    pub fn header_only(opaque_prefix: impl Into<String>) -> Self {
        Self {
            websocket_keyword: None,
            opaque_prefix: opaque_prefix.into(),
        }
    }

    pub fn opaque_prefix(&self) -> &str {
        &self.opaque_prefix
    }

    /// Pull the credential for `header`, falling back to the websocket protocol header.
    pub fn extract(&self, req: &RequestContext, header: &str) -> Option<Credential> {
        let raw = match req.header(header) {
            Some(v) => strip_scheme(v),
            None if req.is_websocket_upgrade() => self.from_websocket_protocol(req)?,
            None => return None,
        };
        if raw.is_empty() {
            return None;
        }
        Some(Credential {
            value: raw.to_string(),
            kind: classify(raw, &self.opaque_prefix),
        })
    }

    fn from_websocket_protocol<'a>(&self, req: &'a RequestContext) -> Option<&'a str> {
        let expected = self.websocket_keyword.as_deref()?;
        let protocols = req.header(WEBSOCKET_PROTOCOL_HEADER)?;
        let mut values = protocols.split(',').map(str::trim);
        let keyword = values.next()?;
        if keyword != expected {
            return None;
        }
        values.next().filter(|v| !v.is_empty())
    }
}
