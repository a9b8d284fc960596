//! Turns a repository reference plus a script path into a raw-content URL.

use crate::config::RunnerConfig;
use crate::error::RunError;
use reqwest::Url;
use std::fmt;

const BROWSE_MARKERS: [&str; 2] = ["tree", "blob"];

/// A fetchable location for one script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub url: Url,
}

impl fmt::Display for ResolvedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.url.fmt(f)
    }
}

/// Pure string transformation from `https://github.com/owner/repo[/tree|blob/branch/dir...]`
/// to `<raw base>/owner/repo/branch/dir.../script_path`, guarded by an optional allow-list.
#[derive(Debug, Clone)]
pub struct SourceResolver {
    allow_list: Vec<String>,
    web_host: String,
    raw_base: Url,
    default_branch: String,
}

impl SourceResolver {
    pub fn new(config: &RunnerConfig) -> Result<Self, String> {
        let raw_base = Url::parse(&config.raw_base_url)
            .map_err(|e| format!("raw base url {:?}: {}", config.raw_base_url, e))?;
        if raw_base.cannot_be_a_base() {
            return Err(format!("raw base url {:?} cannot be a base", config.raw_base_url));
        }
        if config.default_branch.is_empty() || config.default_branch.contains('/') {
            return Err(format!("invalid default branch {:?}", config.default_branch));
        }
        Ok(Self {
            allow_list: config.allow_list.clone(),
            web_host: config.web_host.to_ascii_lowercase(),
            raw_base,
            default_branch: config.default_branch.clone(),
        })
    }

    /// True when no allow-list is configured or the reference starts with a trusted prefix.
    pub fn is_permitted(&self, repository_reference: &str) -> bool {
        self.allow_list.is_empty()
            || self
                .allow_list
                .iter()
                .any(|prefix| repository_reference.starts_with(prefix.as_str()))
    }

    pub fn resolve(
        &self,
        repository_reference: &str,
        script_path: &str,
    ) -> Result<ResolvedSource, RunError> {
        let reference = repository_reference.trim();
        if !self.is_permitted(reference) {
            return Err(RunError::SourceNotPermitted(reference.to_string()));
        }
        // `Url::parse` resolves these, so the URL would no longer match the prefix that was checked.
        if has_path_tricks(reference) {
            return Err(RunError::InvalidRequest(
                "github_repo must not contain dot segments or backslashes".to_string(),
            ));
        }

        let repo_url = Url::parse(reference)
            .map_err(|e| RunError::InvalidRequest(format!("github_repo is not a URL: {}", e)))?;
        if !self.is_permitted(repo_url.as_str()) {
            return Err(RunError::SourceNotPermitted(reference.to_string()));
        }
        if !matches!(repo_url.scheme(), "http" | "https") {
            return Err(RunError::InvalidRequest(format!(
                "github_repo must use http or https, got {}",
                repo_url.scheme()
            )));
        }
        if repo_url.host_str() != Some(self.web_host.as_str()) {
            return Err(RunError::InvalidRequest(format!(
                "github_repo must be a {} URL",
                self.web_host
            )));
        }

        // Segments come back percent-encoded; decode them so the raw URL is encoded exactly once.
        let decoded = repo_url
            .path_segments()
            .map(|s| {
                s.filter(|seg| !seg.is_empty())
                    .map(decode_segment)
                    .collect::<Result<Vec<String>, RunError>>()
            })
            .transpose()?
            .unwrap_or_default();
        let segments: Vec<&str> = decoded.iter().map(String::as_str).collect();
        let (owner, repo, rest) = match segments.as_slice() {
            [owner, repo, rest @ ..] => (*owner, repo.trim_end_matches(".git"), rest),
            _ => {
                return Err(RunError::InvalidRequest(
                    "github_repo must name an owner and a repository".to_string(),
                ))
            }
        };
        if repo.is_empty() {
            return Err(RunError::InvalidRequest(
                "github_repo must name an owner and a repository".to_string(),
            ));
        }

        // A bare branch segment (raw-content style) is taken as-is.
        let (branch, dirs) = match rest {
            [] => (self.default_branch.as_str(), rest),
            [marker] if BROWSE_MARKERS.contains(marker) => {
                return Err(RunError::InvalidRequest(format!(
                    "github_repo has /{}/ but no branch",
                    marker
                )))
            }
            [marker, branch, dirs @ ..] if BROWSE_MARKERS.contains(marker) => (*branch, dirs),
            [branch, dirs @ ..] => (*branch, dirs),
        };

        let script_segments = script_segments(script_path)?;

        let mut url = self.raw_base.clone();
        url.path_segments_mut()
            .map_err(|_| RunError::InvalidRequest("raw base url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend([owner, repo, branch])
            .extend(dirs.iter().copied())
            .extend(script_segments);
        url.set_query(None);
        url.set_fragment(None);

        Ok(ResolvedSource { url })
    }
}

/// True when any path segment is `.`/`..` (literal or percent-encoded) or a
/// backslash appears anywhere.
fn has_path_tricks(reference: &str) -> bool {
    if reference.contains('\\') {
        return true;
    }
    let without_query = reference.split(['?', '#']).next().unwrap_or(reference);
    without_query.split('/').any(|seg| {
        let seg = seg.to_ascii_lowercase().replace("%2e", ".");
        seg == "." || seg == ".."
    })
}

fn decode_segment(segment: &str) -> Result<String, RunError> {
    let decoded = urlencoding::decode(segment)
        .map_err(|_| RunError::InvalidRequest("github_repo path is not valid UTF-8".to_string()))?;
    if decoded.contains('/') || decoded == "." || decoded == ".." {
        return Err(RunError::InvalidRequest(format!(
            "github_repo segment {:?} is not allowed",
            segment
        )));
    }
    Ok(decoded.into_owned())
}

/// Splits a repository-rooted path, refusing anything that could walk out of the tree.
fn script_segments(script_path: &str) -> Result<Vec<&str>, RunError> {
    let trimmed = script_path.trim().trim_start_matches('/');
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.iter().any(|s| s.is_empty() || *s == "." || *s == "..") {
        return Err(RunError::InvalidRequest(format!(
            "backend_path {:?} is not a file path inside the repository",
            script_path
        )));
    }
    Ok(segments)
}
