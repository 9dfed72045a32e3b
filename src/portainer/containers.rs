// ABOUTME: Resolves a wildcard container name to a concrete running container
// Multiple matches are disambiguated by asking the operator for a 1-based index

use crate::error::ResolutionError;
use crate::portainer::client::PortainerClient;
use crate::portainer::types::{ContainerId, ContainerSummary};
use glob::{MatchOptions, Pattern};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{debug, info};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Container name pattern: `?` matches one character, `%` or `*` any run of characters.
#[derive(Debug, Clone)]
pub struct NamePattern {
    raw: String,
    pattern: Pattern,
}

impl NamePattern {
    pub fn new(raw: &str) -> Result<Self, ResolutionError> {
        let mut glob = String::with_capacity(raw.len());
        for ch in raw.chars() {
            match ch {
                // glob only allows `**` as a whole path component
                '%' | '*' if glob.ends_with('*') => {}
                '%' | '*' => glob.push('*'),
                '?' => glob.push('?'),
                '[' | ']' => glob.push_str(&Pattern::escape(&ch.to_string())),
                other => glob.push(other),
            }
        }

        let pattern = Pattern::new(&glob).map_err(|e| ResolutionError::InvalidPattern {
            pattern: raw.to_string(),
            reason: e.msg.to_string(),
        })?;

        Ok(Self {
            raw: raw.to_string(),
            pattern,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Matches against a container name with one leading `/` removed.
    pub fn matches(&self, name: &str) -> bool {
        let name = name.strip_prefix('/').unwrap_or(name);
        self.pattern.matches_with(name, MATCH_OPTIONS)
    }
}

/// A running container as listed by the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCandidate {
    /// Primary name as reported, leading `/` included.
    pub name: String,
    pub id: ContainerId,
}

impl ContainerCandidate {
    /// Containers without any name can never match a pattern and are dropped.
    pub fn from_summary(summary: ContainerSummary) -> Option<Self> {
        let name = summary.names.into_iter().next()?;
        Some(Self {
            name,
            id: ContainerId(summary.id),
        })
    }
}

/// Filters candidates in discovery order.
pub fn matching_candidates(
    pattern: &NamePattern,
    candidates: impl IntoIterator<Item = ContainerCandidate>,
) -> Vec<ContainerCandidate> {
    candidates
        .into_iter()
        .filter(|c| pattern.matches(&c.name))
        .collect()
}

/// Picks one of several matching containers. Returns a 0-based index.
pub trait Chooser: Send + Sync {
    fn choose(&self, candidates: &[ContainerCandidate]) -> Result<usize, ResolutionError>;
}

/// Interactive chooser prompting on stderr and reading stdin.
pub struct StdinChooser;

impl Chooser for StdinChooser {
    fn choose(&self, candidates: &[ContainerCandidate]) -> Result<usize, ResolutionError> {
        let stdin = std::io::stdin();
        let mut stderr = std::io::stderr();
        prompt_selection(candidates, &mut stdin.lock(), &mut stderr)
    }
}

/// Prints the numbered list and reads a single 1-based choice.
pub fn prompt_selection<R: BufRead, W: Write>(
    candidates: &[ContainerCandidate],
    input: &mut R,
    output: &mut W,
) -> Result<usize, ResolutionError> {
    writeln!(output, "We found more than one containers in system:")?;
    for (i, candidate) in candidates.iter().enumerate() {
        writeln!(
            output,
            "[{}] Container: {}, ID {}",
            i + 1,
            candidate.name,
            candidate.id
        )?;
    }
    writeln!(output, "--------------------------------------------")?;
    write!(output, "Which one you want to connect: ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    parse_selection(line.trim(), candidates.len())
}

fn parse_selection(input: &str, count: usize) -> Result<usize, ResolutionError> {
    match input.parse::<usize>() {
        Ok(choice) if (1..=count).contains(&choice) => Ok(choice - 1),
        _ => Err(ResolutionError::InvalidSelection {
            input: input.to_string(),
            count,
        }),
    }
}

pub struct ContainerResolver {
    client: Arc<PortainerClient>,
    chooser: Arc<dyn Chooser>,
}

impl ContainerResolver {
    pub fn new(client: Arc<PortainerClient>, chooser: Arc<dyn Chooser>) -> Self {
        Self { client, chooser }
    }

    pub async fn list_running(&self) -> Result<Vec<ContainerCandidate>, ResolutionError> {
        let url = self.client.docker_url("containers/json");
        let summaries: Vec<ContainerSummary> = self.client.get_json(&url).await?;
        debug!(count = summaries.len(), "listed running containers");
        Ok(summaries
            .into_iter()
            .filter_map(ContainerCandidate::from_summary)
            .collect())
    }

    pub async fn resolve(&self, pattern: &str) -> Result<ContainerCandidate, ResolutionError> {
        let pattern = NamePattern::new(pattern)?;
        let mut matches = matching_candidates(&pattern, self.list_running().await?);
        info!(pattern = pattern.as_str(), matches = matches.len(), "resolved container pattern");

        let index = match matches.len() {
            0 => {
                return Err(ResolutionError::NotFound {
                    pattern: pattern.as_str().to_string(),
                })
            }
            1 => 0,
            _ => {
                let chooser = Arc::clone(&self.chooser);
                let listed = matches.clone();
                tokio::task::spawn_blocking(move || chooser.choose(&listed))
                    .await
                    .map_err(|e| {
                        ResolutionError::Prompt(std::io::Error::new(std::io::ErrorKind::Other, e))
                    })??
            }
        };

        Ok(matches.swap_remove(index))
    }
}
