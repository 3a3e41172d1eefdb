//! Source access policy resolved from a robots.txt document.
//!
//! A session resolves the policy once before its first request and keeps it
//! for the session's lifetime. Matching follows the usual robots.txt rules:
//! the groups naming our user agent win over `*`, and within the selected
//! groups the longest matching path prefix decides, with `Allow` winning ties.

#[derive(Debug, Clone, PartialEq, Eq)]
struct PathRule {
    allow: bool,
    prefix: String,
}

#[derive(Debug, Clone, Default)]
struct AgentGroup {
    agents: Vec<String>,
    rules: Vec<PathRule>,
}

/// Parsed access rules for one source.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    groups: Vec<AgentGroup>,
}

impl AccessPolicy {
    /// A policy that permits every request.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse a robots.txt document. Unknown directives are ignored.
    pub fn parse(text: &str) -> Self {
        let mut groups: Vec<AgentGroup> = Vec::new();
        let mut current: Option<AgentGroup> = None;

        for raw_line in text.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    // Consecutive user-agent lines share one group.
                    let starts_new = current.as_ref().is_some_and(|g| !g.rules.is_empty());
                    if starts_new {
                        groups.extend(current.take());
                    }
                    current
                        .get_or_insert_with(AgentGroup::default)
                        .agents
                        .push(value.to_ascii_lowercase());
                }
                "allow" | "disallow" => {
                    let Some(group) = current.as_mut() else {
                        continue;
                    };
                    // An empty Disallow permits everything.
                    if value.is_empty() {
                        continue;
                    }
                    group.rules.push(PathRule {
                        allow: key == "allow",
                        prefix: value.to_string(),
                    });
                }
                _ => {}
            }
        }
        groups.extend(current);

        Self { groups }
    }

    /// Whether `user_agent` may fetch `url`.
    pub fn allows(&self, user_agent: &str, url: &str) -> bool {
        let agent = user_agent.to_ascii_lowercase();
        let specific: Vec<&AgentGroup> = self
            .groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a != "*" && agent.contains(a.as_str())))
            .collect();
        let selected: Vec<&AgentGroup> = if specific.is_empty() {
            self.groups
                .iter()
                .filter(|g| g.agents.iter().any(|a| a == "*"))
                .collect()
        } else {
            specific
        };

        let path = url_path(url);
        let best = selected
            .iter()
            .flat_map(|g| g.rules.iter())
            .filter(|rule| path.starts_with(rule.prefix.as_str()))
            .max_by_key(|rule| (rule.prefix.len(), rule.allow));

        best.map_or(true, |rule| rule.allow)
    }

    /// True when no rules were parsed.
    pub fn is_unrestricted(&self) -> bool {
        self.groups.iter().all(|g| g.rules.is_empty())
    }
}

/// Path and query of a URL, as robots rules match them.
///
/// Inputs that are not absolute URLs (local file paths) are matched as-is.
fn url_path(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        },
        Err(_) if url.is_empty() => "/".to_string(),
        Err(_) => url.to_string(),
    }
}
