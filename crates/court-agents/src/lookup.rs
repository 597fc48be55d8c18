//! Wikipedia content lookup over the MediaWiki action API.
//!
//! One lookup is two requests: a full-text search for the top-k titles, then
//! plain-text intro extracts for those titles. Hits that do not mention the
//! trial topic are dropped before they reach the evidence store.
//!
//! [`FallbackLookup`] chains providers so a side that finds nothing relevant
//! on the first one still gets a second chance.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use court::{CollaboratorError, ContentLookup, Finding};

use crate::config::WikipediaConfig;

/// Tokens shorter than this are ignored by the relevance filter.
const MIN_TOKEN_CHARS: usize = 4;

pub struct WikipediaLookup {
    client: reqwest::Client,
    url: String,
    top_k: usize,
    doc_chars_max: usize,
}

impl WikipediaLookup {
    pub fn new(config: &WikipediaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("court-agents/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build Wikipedia HTTP client")?;
        Ok(Self {
            client,
            url: config.url.clone(),
            top_k: config.top_k(),
            doc_chars_max: config.doc_chars_max(),
        })
    }

    async fn get_json(&self, params: &[(&str, &str)]) -> Result<Value, CollaboratorError> {
        let response = self
            .client
            .get(&self.url)
            .query(params)
            .query(&[("format", "json"), ("formatversion", "2")])
            .send()
            .await
            .map_err(|e| CollaboratorError::Lookup(e.to_string()))?
            .error_for_status()
            .map_err(|e| CollaboratorError::Lookup(e.to_string()))?;
        response
            .json::<Value>()
            .await
            .map_err(|e| CollaboratorError::Malformed(format!("wikipedia response: {e}")))
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, CollaboratorError> {
        let limit = self.top_k.to_string();
        let body = self
            .get_json(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", limit.as_str()),
            ])
            .await?;
        parse_titles(&body)
    }

    async fn extracts(&self, titles: &[String]) -> Result<Vec<(String, String)>, CollaboratorError> {
        let joined = titles.join("|");
        let body = self
            .get_json(&[
                ("action", "query"),
                ("prop", "extracts"),
                ("exintro", "1"),
                ("explaintext", "1"),
                ("redirects", "1"),
                ("titles", joined.as_str()),
            ])
            .await?;
        parse_extracts(&body, titles, self.doc_chars_max)
    }
}

#[async_trait]
impl ContentLookup for WikipediaLookup {
    async fn lookup(&self, query: &str, focus: &str) -> Result<Vec<Finding>, CollaboratorError> {
        let titles = self.search(query).await?;
        if titles.is_empty() {
            debug!(query, "No Wikipedia results");
            return Ok(Vec::new());
        }
        let pages = self.extracts(&titles).await?;
        let total = pages.len();
        let findings: Vec<Finding> = pages
            .into_iter()
            .filter(|(title, text)| is_relevant(focus, title, text))
            .map(|(title, text)| {
                Finding::new(format!("{title}: {text}")).with_source(format!("wikipedia:{title}"))
            })
            .collect();
        debug!(
            query,
            pages = total,
            kept = findings.len(),
            "Wikipedia lookup complete"
        );
        Ok(findings)
    }
}

/// Ordered chain of lookups.
///
/// Each provider's hits are filtered with [`is_relevant`]; the first provider
/// left with any hits wins. A failing provider counts as a miss, and a chain
/// where every provider misses yields no hits rather than an error.
pub struct FallbackLookup {
    providers: Vec<(String, Arc<dyn ContentLookup>)>,
}

impl FallbackLookup {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Append `provider`, tried after every provider already added.
    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn ContentLookup>) -> Self {
        self.providers.push((name.into(), provider));
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl Default for FallbackLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentLookup for FallbackLookup {
    async fn lookup(&self, query: &str, focus: &str) -> Result<Vec<Finding>, CollaboratorError> {
        for (name, provider) in &self.providers {
            match provider.lookup(query, focus).await {
                Ok(hits) => {
                    let total = hits.len();
                    let relevant: Vec<Finding> = hits
                        .into_iter()
                        .filter(|hit| is_relevant(focus, "", &hit.text))
                        .collect();
                    if !relevant.is_empty() {
                        return Ok(relevant);
                    }
                    debug!(provider = %name, query, hits = total, "No relevant hits, trying next provider");
                }
                Err(e) => {
                    debug!(provider = %name, query, error = %e, "Provider failed, trying next provider");
                }
            }
        }
        Ok(Vec::new())
    }
}

fn api_error(body: &Value) -> Option<CollaboratorError> {
    let error = body.get("error")?;
    let info = error
        .get("info")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    Some(CollaboratorError::Lookup(format!("wikipedia api: {info}")))
}

/// Titles from a `list=search` response, in rank order.
pub fn parse_titles(body: &Value) -> Result<Vec<String>, CollaboratorError> {
    if let Some(err) = api_error(body) {
        return Err(err);
    }
    let results = body
        .pointer("/query/search")
        .and_then(Value::as_array)
        .ok_or_else(|| CollaboratorError::Malformed("search response without query.search".into()))?;
    Ok(results
        .iter()
        .filter_map(|hit| hit.get("title").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}

/// `(canonical title, extract)` pairs from a `prop=extracts` response, in the
/// order of `requested`.
///
/// Titles are followed through normalization and redirects. Missing pages
/// and empty extracts are skipped; extracts are cut to `max_chars`.
pub fn parse_extracts(
    body: &Value,
    requested: &[String],
    max_chars: usize,
) -> Result<Vec<(String, String)>, CollaboratorError> {
    if let Some(err) = api_error(body) {
        return Err(err);
    }
    let query = body
        .get("query")
        .ok_or_else(|| CollaboratorError::Malformed("extracts response without query".into()))?;

    let mut renames: HashMap<&str, &str> = HashMap::new();
    for key in ["normalized", "redirects"] {
        for entry in query.get(key).and_then(Value::as_array).into_iter().flatten() {
            if let (Some(from), Some(to)) = (
                entry.get("from").and_then(Value::as_str),
                entry.get("to").and_then(Value::as_str),
            ) {
                renames.insert(from, to);
            }
        }
    }

    let mut pages: HashMap<&str, &str> = HashMap::new();
    for page in query.get("pages").and_then(Value::as_array).into_iter().flatten() {
        if let (Some(title), Some(extract)) = (
            page.get("title").and_then(Value::as_str),
            page.get("extract").and_then(Value::as_str),
        ) {
            pages.insert(title, extract);
        }
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for title in requested {
        let mut canonical = title.as_str();
        // normalized -> redirect is at most two hops
        for _ in 0..2 {
            if let Some(next) = renames.get(canonical) {
                canonical = *next;
            }
        }
        let Some(extract) = pages.get(canonical) else {
            continue;
        };
        let text: String = extract.trim().chars().take(max_chars).collect();
        if text.trim().is_empty() || !seen.insert(canonical) {
            continue;
        }
        out.push((canonical.to_string(), text.trim_end().to_string()));
    }
    Ok(out)
}

/// Whether a page plausibly concerns `focus`.
///
/// Significant focus tokens are alphanumeric runs of at least four
/// characters. A multi-token focus needs two of them in the page, a
/// single-token focus needs one. A focus with no such token matches
/// everything.
pub fn is_relevant(focus: &str, title: &str, text: &str) -> bool {
    let focus = focus.to_lowercase();
    let mut tokens: Vec<&str> = focus
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .collect();
    tokens.sort_unstable();
    tokens.dedup();
    if tokens.is_empty() {
        return true;
    }

    let haystack = format!("{title} {text}").to_lowercase();
    let matches = tokens.iter().filter(|t| haystack.contains(**t)).count();
    let needed = if tokens.len() > 1 { 2 } else { 1 };
    matches >= needed
}
