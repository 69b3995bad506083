// src/evaluator/parser.rs — Parse critic rubric responses
//
// Expected shape (prose or a fenced block around it is tolerated):
//
// {"score": 0.82, "rationale": "...", "suggestions": ["..."],
//  "blocking_issues": ["..."], "blocking": false}

use anyhow::{bail, Context as _};
use serde::Deserialize;

/// A critic's verdict after validation. `score` is always within [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Rubric {
    pub score: f64,
    pub rationale: String,
    pub suggestions: Vec<String>,
    pub blocking_issues: Vec<String>,
    pub blocking: bool,
}

#[derive(Deserialize)]
struct RawRubric {
    score: f64,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    suggestions: OneOrMany,
    #[serde(default, alias = "blockingIssues")]
    blocking_issues: Vec<String>,
    #[serde(default)]
    blocking: bool,
}

#[derive(Deserialize, Default)]
#[serde(untagged)]
enum OneOrMany {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        let items = match self {
            OneOrMany::None => Vec::new(),
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        };
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

pub fn parse_rubric(response: &str) -> anyhow::Result<Rubric> {
    let json = extract_json_object(response).context("no JSON object in critic response")?;
    let raw: RawRubric = serde_json::from_str(json).context("malformed rubric JSON")?;

    if !raw.score.is_finite() || !(0.0..=1.0).contains(&raw.score) {
        bail!("score {} is outside [0, 1]", raw.score);
    }

    let blocking_issues: Vec<String> = raw
        .blocking_issues
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    Ok(Rubric {
        score: raw.score,
        rationale: raw.rationale.trim().to_string(),
        suggestions: raw.suggestions.into_vec(),
        blocking: raw.blocking || !blocking_issues.is_empty(),
        blocking_issues,
    })
}

/// The outermost `{ ... }` span, looking inside a fenced block first.
fn extract_json_object(text: &str) -> Option<&str> {
    let body = fenced_body(text).unwrap_or(text);
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| &body[start..=end])
}

fn fenced_body(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    // Skip an info string such as `json`.
    let content_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let content = &after[content_start..];
    let close = content.find("```")?;
    Some(&content[..close])
}
