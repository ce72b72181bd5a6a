//! Request classification.
//!
//! Pure and total: every request maps to exactly one [`RequestKind`].

use axum::http::Method;
use url::{Origin, Url};

use crate::domain::InterceptedRequest;

const DEFAULT_STATIC_PREFIXES: [&str; 3] = ["css", "js", "images"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Navigable page; served network-first.
    Document,
    /// Sub-resource; served cache-first.
    StaticAsset,
    /// Not intercepted at all.
    NonCacheable,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::StaticAsset => "static_asset",
            Self::NonCacheable => "non_cacheable",
        }
    }
}

/// Which same-origin GET requests count as documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentScope {
    /// Navigations, `.html`, `/`, and extension-less paths outside the
    /// static prefixes.
    Heuristic,
    /// Only paths under one of these prefixes.
    Prefixes(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierRules {
    /// Path prefixes that never hold documents under [`DocumentScope::Heuristic`].
    pub static_prefixes: Vec<String>,
    pub document_scope: DocumentScope,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            static_prefixes: DEFAULT_STATIC_PREFIXES
                .iter()
                .map(|prefix| prefix.to_string())
                .collect(),
            document_scope: DocumentScope::Heuristic,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestClassifier {
    origin: Origin,
    rules: ClassifierRules,
}

impl RequestClassifier {
    pub fn new(serving_origin: &Url, rules: ClassifierRules) -> Self {
        Self {
            origin: serving_origin.origin(),
            rules,
        }
    }

    pub fn rules(&self) -> &ClassifierRules {
        &self.rules
    }

    pub fn classify(&self, request: &InterceptedRequest) -> RequestKind {
        if request.method != Method::GET {
            return RequestKind::NonCacheable;
        }

        if request.url.origin() != self.origin {
            return RequestKind::NonCacheable;
        }

        if request.carries_credentials() {
            return RequestKind::NonCacheable;
        }

        if self.is_document(request) {
            RequestKind::Document
        } else {
            RequestKind::StaticAsset
        }
    }

    fn is_document(&self, request: &InterceptedRequest) -> bool {
        let path = request.path();
        match &self.rules.document_scope {
            DocumentScope::Heuristic => {
                request.destination.is_document()
                    || path.ends_with(".html")
                    || path == "/"
                    || (!has_extension(path)
                        && !self
                            .rules
                            .static_prefixes
                            .iter()
                            .any(|prefix| under_prefix(path, prefix)))
            }
            DocumentScope::Prefixes(prefixes) => {
                prefixes.iter().any(|prefix| under_prefix(path, prefix))
            }
        }
    }
}

/// Segment-aware: `css` matches `/css` and `/css/site.css`, not `/cssx`.
fn under_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return true;
    }

    match path.trim_start_matches('/').strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn has_extension(path: &str) -> bool {
    path.rsplit('/').next().is_some_and(|segment| segment.contains('.'))
}
