//! Ticket-tracker collaborator (Jira Cloud REST v3).

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::Value;
use tracing::{debug, instrument};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

static ISSUE_KEY: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Z][A-Z0-9]+-[0-9]+$").unwrap());

/// True for keys shaped like `PAY-123`.
pub fn is_valid_issue_key(key: &str) -> bool {
    ISSUE_KEY.is_match(key)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketLookup {
    /// Formatted ticket text for the model.
    Found(String),
    NotFound,
}

pub trait TicketSource {
    fn fetch(&self, key: &str) -> Result<TicketLookup>;
}

#[derive(Debug, Clone)]
pub struct JiraCredentials {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
}

impl JiraCredentials {
    /// Read `JIRA_URL`, `JIRA_EMAIL`, and `JIRA_API_TOKEN`; `None` if any is
    /// missing or blank.
    pub fn from_env() -> Option<Self> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Some(Self {
            base_url: normalize_base_url(&read("JIRA_URL")?),
            email: read("JIRA_EMAIL")?,
            api_token: read("JIRA_API_TOKEN")?,
        })
    }
}

/// Add an `https://` scheme when missing and drop trailing slashes.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

pub struct JiraClient {
    client: Client,
    credentials: JiraCredentials,
}

impl JiraClient {
    pub fn new(credentials: JiraCredentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            credentials,
        })
    }
}

impl TicketSource for JiraClient {
    #[instrument(skip_all, fields(key))]
    fn fetch(&self, key: &str) -> Result<TicketLookup> {
        if !is_valid_issue_key(key) {
            return Err(anyhow!("invalid issue key '{key}'"));
        }
        let url = format!("{}/rest/api/3/issue/{key}", self.credentials.base_url);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.credentials.email, Some(&self.credentials.api_token))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .with_context(|| format!("GET issue {key}"))?;
        let status = response.status();
        debug!(%status, "jira response");
        if status == StatusCode::NOT_FOUND {
            return Ok(TicketLookup::NotFound);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!(
                "jira returned {status} for {key}: {}",
                body.chars().take(300).collect::<String>()
            ));
        }
        let issue: Value = response.json().context("decode issue json")?;
        Ok(TicketLookup::Found(format_issue(key, &issue)))
    }
}

/// Render an issue payload as plain text for the model.
pub fn format_issue(key: &str, issue: &Value) -> String {
    let fields = &issue["fields"];
    let name_of = |field: &str| {
        fields[field]["name"]
            .as_str()
            .unwrap_or("Unknown")
            .to_string()
    };
    let summary = fields["summary"].as_str().unwrap_or("No summary");
    let parent = fields["parent"]["key"].as_str().unwrap_or("None");

    let links: Vec<String> = fields["issuelinks"]
        .as_array()
        .map(|links| links.iter().filter_map(format_link).collect())
        .unwrap_or_default();
    let links = if links.is_empty() {
        "None".to_string()
    } else {
        links.join("\n")
    };

    let description = adf_text(&fields["description"]);
    let description = if description.trim().is_empty() {
        "No description provided.".to_string()
    } else {
        description.trim().to_string()
    };

    format!(
        "--- TICKET {key} ---\nSummary: {summary}\nIssue Type: {}\nStatus: {}\nParent: {parent}\n\n\
         Linked Issues:\n{links}\n\nDescription:\n{description}\n---",
        name_of("issuetype"),
        name_of("status"),
    )
}

fn format_link(link: &Value) -> Option<String> {
    let kind = &link["type"];
    let fallback = kind["name"].as_str().unwrap_or("Related");
    for (side, direction) in [("outwardIssue", "outward"), ("inwardIssue", "inward")] {
        if let Some(target) = link[side]["key"].as_str() {
            let label = kind[direction].as_str().unwrap_or(fallback);
            return Some(format!("- {label} {target} ({direction})"));
        }
    }
    None
}

/// Flatten Atlassian Document Format into text by walking `text` and
/// `content` recursively. Plain strings pass through.
pub fn adf_text(node: &Value) -> String {
    match node {
        Value::String(text) => text.clone(),
        Value::Array(items) => join_nonempty(items.iter().map(adf_text)),
        Value::Object(map) => {
            let own = map
                .get("text")
                .and_then(Value::as_str)
                .map(ToString::to_string);
            let children = map
                .get("content")
                .and_then(Value::as_array)
                .map(|items| join_nonempty(items.iter().map(adf_text)));
            join_nonempty(own.into_iter().chain(children))
        }
        _ => String::new(),
    }
}

fn join_nonempty(parts: impl Iterator<Item = String>) -> String {
    parts
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
