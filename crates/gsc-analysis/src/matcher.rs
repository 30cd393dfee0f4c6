//! Matches GSC-reported URLs to CMS documents by slug.
//!
//! Matching never fails: malformed URLs and misses are reported through
//! [`UnmatchReason`] plus [`MatchDiagnostics`] so editors can repair slugs.

use std::collections::HashMap;

use gsc_core::{
    ContentDocument, DocumentRef, MatchConfidence, MatchDiagnostics, MatchResult, UnmatchReason,
    UrlMatcherConfig,
};
use regex::Regex;
use strsim::levenshtein;
use tracing::debug;
use url::Url;

const MAX_SIMILAR_SLUGS: usize = 3;
const MIN_SIMILARITY_DISTANCE: f64 = 10.0;

/// Lowercased, trailing-slash-free slug key.
pub fn normalize_slug(raw: &str) -> String {
    raw.trim().to_lowercase().trim_end_matches('/').to_string()
}

/// Slug → document lookup, iterated in insertion order.
#[derive(Debug, Clone, Default)]
pub struct SlugTable {
    entries: Vec<(String, DocumentRef)>,
    index: HashMap<String, usize>,
}

impl SlugTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents(documents: &[ContentDocument]) -> Self {
        let mut table = Self::new();
        for doc in documents {
            if let Some(slug) = &doc.slug {
                table.insert(
                    slug,
                    DocumentRef {
                        id: doc.id.clone(),
                        created_at: doc.created_at,
                    },
                );
            }
        }
        table
    }

    /// Later inserts for the same normalized slug replace the document but keep its position.
    pub fn insert(&mut self, raw_slug: &str, doc: DocumentRef) {
        let key = normalize_slug(raw_slug);
        if key.is_empty() {
            return;
        }
        match self.index.get(&key) {
            Some(&pos) => self.entries[pos].1 = doc,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, doc));
            }
        }
    }

    pub fn get(&self, slug: &str) -> Option<&DocumentRef> {
        self.index.get(slug).map(|&pos| &self.entries[pos].1)
    }

    pub fn slugs(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(slug, _)| slug.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    pub normalized: String,
    /// Lowercased path; `None` when the input could not be parsed as a URL.
    pub path: Option<String>,
}

pub fn normalize_url(raw: &str) -> NormalizedUrl {
    let mut url = match Url::parse(raw.trim()) {
        Ok(url) => url,
        Err(_) => {
            return NormalizedUrl {
                normalized: raw.to_lowercase(),
                path: None,
            }
        }
    };

    let bare_host = url
        .host_str()
        .and_then(|host| host.strip_prefix("www."))
        .filter(|host| !host.is_empty())
        .map(str::to_string);
    if let Some(host) = bare_host {
        // A host the parser rejects keeps its original `www.` form.
        if url.set_host(Some(&host)).is_err() {
            debug!(url = raw, "kept www host that could not be stripped");
        }
    }
    url.set_query(None);
    url.set_fragment(None);

    NormalizedUrl {
        normalized: url.as_str().to_lowercase(),
        path: Some(url.path().to_lowercase()),
    }
}

/// Closest slugs by edit distance, nearest first; ties keep table order.
pub fn similar_slugs(target: &str, table: &SlugTable, limit: usize) -> Vec<String> {
    let max_distance = (target.chars().count() as f64 * 0.5).max(MIN_SIMILARITY_DISTANCE);
    let mut scored = table
        .slugs()
        .map(|slug| (levenshtein(target, slug), slug))
        .filter(|(distance, _)| *distance as f64 <= max_distance)
        .collect::<Vec<_>>();
    scored.sort_by_key(|(distance, _)| *distance);
    scored
        .into_iter()
        .take(limit)
        .map(|(_, slug)| slug.to_string())
        .collect()
}

#[derive(Debug, Clone)]
pub struct UrlMatcher {
    path_prefix: Option<String>,
    prefix_pattern: Option<Regex>,
}

impl UrlMatcher {
    pub fn new(config: &UrlMatcherConfig) -> Result<Self, regex::Error> {
        Self::with_prefix(config.path_prefix.as_deref())
    }

    pub fn with_prefix(prefix: Option<&str>) -> Result<Self, regex::Error> {
        let path_prefix = prefix.and_then(normalize_prefix);
        let prefix_pattern = path_prefix
            .as_deref()
            .map(|p| Regex::new(&format!("^{}(/|$)", regex::escape(p))))
            .transpose()?;
        Ok(Self {
            path_prefix,
            prefix_pattern,
        })
    }

    pub fn path_prefix(&self) -> Option<&str> {
        self.path_prefix.as_deref()
    }

    /// One result per input URL, in input order.
    pub fn match_urls<S: AsRef<str>>(&self, urls: &[S], table: &SlugTable) -> Vec<MatchResult> {
        urls.iter()
            .map(|url| self.match_url(url.as_ref(), table))
            .collect()
    }

    pub fn match_url(&self, gsc_url: &str, table: &SlugTable) -> MatchResult {
        let normalized = normalize_url(gsc_url);
        let diagnostics = |path_after_prefix: Option<&str>, similar_slugs: Vec<String>| {
            Some(MatchDiagnostics {
                normalized_url: normalized.normalized.clone(),
                path_after_prefix: path_after_prefix.map(str::to_string),
                configured_prefix: self.path_prefix.clone(),
                available_slugs_count: table.len(),
                similar_slugs,
            })
        };

        let Some(path) = normalized.path.as_deref() else {
            return unmatched(
                gsc_url,
                UnmatchReason::NoSlugExtracted,
                None,
                diagnostics(None, Vec::new()),
            );
        };

        let path_after_prefix = match (&self.prefix_pattern, &self.path_prefix) {
            (Some(pattern), Some(prefix)) => {
                if !pattern.is_match(path) {
                    return unmatched(
                        gsc_url,
                        UnmatchReason::OutsidePathPrefix,
                        None,
                        diagnostics(None, Vec::new()),
                    );
                }
                &path[prefix.len()..]
            }
            _ => path,
        };

        // `raw_slug` keeps any trailing slash so the exact lookup stays literal.
        let raw_slug = path_after_prefix.trim_start_matches('/');
        let extracted = raw_slug.trim_end_matches('/');
        if extracted.is_empty() {
            return unmatched(
                gsc_url,
                UnmatchReason::NoSlugExtracted,
                None,
                diagnostics(Some(path_after_prefix), Vec::new()),
            );
        }

        if let Some(doc) = table.get(raw_slug) {
            return matched(gsc_url, doc, raw_slug, extracted, MatchConfidence::Exact);
        }

        let without_slash = raw_slug.trim_end_matches('/');
        let with_slash = format!("{raw_slug}/");
        for variant in [without_slash, with_slash.as_str()] {
            if let Some(doc) = table.get(variant) {
                return matched(gsc_url, doc, variant, extracted, MatchConfidence::Normalized);
            }
        }

        let suggestions = similar_slugs(extracted, table, MAX_SIMILAR_SLUGS);
        unmatched(
            gsc_url,
            UnmatchReason::NoMatchingDocument,
            Some(extracted),
            diagnostics(Some(path_after_prefix), suggestions),
        )
    }
}

fn normalize_prefix(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('/').to_lowercase();
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("/{trimmed}"))
    }
}

fn matched(
    gsc_url: &str,
    doc: &DocumentRef,
    slug: &str,
    extracted: &str,
    confidence: MatchConfidence,
) -> MatchResult {
    MatchResult {
        gsc_url: gsc_url.to_string(),
        sanity_id: Some(doc.id.clone()),
        confidence,
        matched_slug: Some(slug.to_string()),
        unmatch_reason: UnmatchReason::Matched,
        extracted_slug: Some(extracted.to_string()),
        diagnostics: None,
    }
}

fn unmatched(
    gsc_url: &str,
    reason: UnmatchReason,
    extracted: Option<&str>,
    diagnostics: Option<MatchDiagnostics>,
) -> MatchResult {
    MatchResult {
        gsc_url: gsc_url.to_string(),
        sanity_id: None,
        confidence: MatchConfidence::None,
        matched_slug: None,
        unmatch_reason: reason,
        extracted_slug: extracted.map(str::to_string),
        diagnostics,
    }
}
