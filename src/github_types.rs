use serde::Deserialize;

use crate::models::{RepositoryBasic, RepositoryCounters};

#[derive(Deserialize)]
pub struct SearchData {
    pub search: SearchConnection,
}

#[derive(Deserialize)]
pub struct SearchConnection {
    #[serde(rename = "pageInfo")]
    pub page_info: PageInfo,
    pub nodes: Option<Vec<Option<RepositoryNode>>>,
}

#[derive(Deserialize)]
pub struct PageInfo {
    #[serde(rename = "endCursor")]
    pub end_cursor: Option<String>,
    #[serde(rename = "hasNextPage")]
    pub has_next_page: bool,
}

/// Search hit. Non-repository hits come back as `{}`, so every field is optional.
#[derive(Deserialize, Default)]
#[serde(default)]
pub struct RepositoryNode {
    pub name: Option<String>,
    pub owner: Option<OwnerNode>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
    #[serde(rename = "pushedAt")]
    pub pushed_at: Option<String>,
    #[serde(rename = "primaryLanguage")]
    pub primary_language: Option<LanguageNode>,
    pub url: Option<String>,
}

#[derive(Deserialize)]
pub struct OwnerNode {
    pub login: String,
}

#[derive(Deserialize)]
pub struct LanguageNode {
    pub name: String,
}

impl RepositoryNode {
    pub fn into_basic(self) -> Option<RepositoryBasic> {
        Some(RepositoryBasic {
            owner: self.owner?.login,
            name: self.name?,
            created_at: self.created_at.unwrap_or_default(),
            pushed_at: self.pushed_at,
            primary_language: self.primary_language.map(|l| l.name),
            url: self.url.unwrap_or_default(),
        })
    }
}

#[derive(Deserialize)]
pub struct CountersData {
    pub repository: Option<CountersNode>,
}

#[derive(Deserialize)]
pub struct CountersNode {
    #[serde(rename = "pullRequests")]
    pub pull_requests: TotalCount,
    pub releases: TotalCount,
    pub issues: TotalCount,
    #[serde(rename = "closedIssues")]
    pub closed_issues: TotalCount,
}

#[derive(Deserialize)]
pub struct TotalCount {
    #[serde(rename = "totalCount")]
    pub total_count: u64,
}

impl From<CountersNode> for RepositoryCounters {
    fn from(node: CountersNode) -> Self {
        Self {
            merged_prs: node.pull_requests.total_count,
            releases: node.releases.total_count,
            issues_total: node.issues.total_count,
            issues_closed: node.closed_issues.total_count,
        }
    }
}
