//! Locate the plan text a human is asked to review.
//!
//! Sources, in order:
//! 1. the `plan` field of the tool input
//! 2. the most recent plan-file `Write` in the session transcript
//! 3. a conventional plan file under the working directory

use crate::paths::PLAN_CANDIDATES;
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const MAX_TITLE_LEN: usize = 120;

/// Where a plan was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSource {
    ToolInput,
    Transcript(PathBuf),
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlan {
    pub content: String,
    pub source: PlanSource,
}

/// Run the fallback chain. `None` means there is nothing to review.
pub fn resolve_plan(
    tool_input: &Value,
    transcript: Option<&Path>,
    cwd: &Path,
) -> Option<ResolvedPlan> {
    if let Some(content) = plan_from_tool_input(tool_input) {
        return Some(ResolvedPlan {
            content,
            source: PlanSource::ToolInput,
        });
    }
    if let Some(path) = transcript {
        if let Some(content) = plan_from_transcript(path) {
            return Some(ResolvedPlan {
                content,
                source: PlanSource::Transcript(path.to_path_buf()),
            });
        }
    }
    plan_from_candidates(cwd).map(|(path, content)| ResolvedPlan {
        content,
        source: PlanSource::File(path),
    })
}

pub fn plan_from_tool_input(tool_input: &Value) -> Option<String> {
    tool_input
        .get("plan")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Transcript scan
// ---------------------------------------------------------------------------

static PLAN_FILE_RE: OnceLock<Regex> = OnceLock::new();

fn plan_file_re() -> &'static Regex {
    PLAN_FILE_RE.get_or_init(|| Regex::new(r"(?i)(^|[/._-])plan[^/]*\.md$").unwrap())
}

/// True for paths that look like a plan file: a file name with a `plan*.md`
/// word (`plan.md`, `my-plan-v2.md`, not `explanation.md`), or anything under
/// a `.claude/plan…` directory. Backslashes are normalized first.
pub fn is_plan_path(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    plan_file_re().is_match(&normalized) || normalized.contains(".claude/plan")
}

/// Scan the transcript from the end for the latest assistant `Write` of a
/// plan file. Malformed lines are skipped.
pub fn plan_from_transcript(path: &Path) -> Option<String> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) => {
            tracing::debug!("transcript {} unreadable: {e}", path.display());
            return None;
        }
    };
    data.lines().rev().find_map(|line| {
        let entry: Value = serde_json::from_str(line).ok()?;
        plan_write_in_entry(&entry)
    })
}

fn plan_write_in_entry(entry: &Value) -> Option<String> {
    if entry.get("type").and_then(Value::as_str) != Some("assistant") {
        return None;
    }
    let blocks = entry.pointer("/message/content")?.as_array()?;
    blocks.iter().rev().find_map(|block| {
        if block.get("type").and_then(Value::as_str) != Some("tool_use")
            || block.get("name").and_then(Value::as_str) != Some("Write")
        {
            return None;
        }
        let input = block.get("input")?;
        let file_path = input.get("file_path").and_then(Value::as_str)?;
        if !is_plan_path(file_path) {
            return None;
        }
        input
            .get("content")
            .and_then(Value::as_str)
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string)
    })
}

// ---------------------------------------------------------------------------
// Conventional files
// ---------------------------------------------------------------------------

pub fn plan_from_candidates(cwd: &Path) -> Option<(PathBuf, String)> {
    PLAN_CANDIDATES.iter().find_map(|rel| {
        let path = cwd.join(rel);
        let content = std::fs::read_to_string(&path).ok()?;
        if content.trim().is_empty() {
            return None;
        }
        Some((path, content))
    })
}

// ---------------------------------------------------------------------------
// Title
// ---------------------------------------------------------------------------

/// Title for an uploaded plan: the first markdown heading, else the first
/// non-empty line, truncated to a readable length.
pub fn plan_title(content: &str) -> String {
    let heading = content
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with('#'))
        .map(|l| l.trim_start_matches('#').trim());
    let first_line = || content.lines().map(str::trim).find(|l| !l.is_empty());
    let title = heading
        .filter(|h| !h.is_empty())
        .or_else(first_line)
        .unwrap_or("Untitled plan");
    truncate_chars(title, MAX_TITLE_LEN)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max - 1).collect();
    out.push('…');
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_entry(path: &str, content: &str) -> String {
        json!({
            "type": "assistant",
            "message": {
                "content": [
                    { "type": "text", "text": "writing" },
                    { "type": "tool_use", "name": "Write",
                      "input": { "file_path": path, "content": content } }
                ]
            }
        })
        .to_string()
    }

    fn transcript(dir: &TempDir, lines: &[String]) -> PathBuf {
        let path = dir.path().join("session.jsonl");
        let mut f = std::fs::File::create(&path).unwrap();
        for l in lines {
            writeln!(f, "{l}").unwrap();
        }
        path
    }

    #[test]
    fn tool_input_plan_wins() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("plan.md"), "# From file").unwrap();
        let got = resolve_plan(&json!({ "plan": "# Inline" }), None, dir.path()).unwrap();
        assert_eq!(got.content, "# Inline");
        assert_eq!(got.source, PlanSource::ToolInput);
    }

    #[test]
    fn blank_tool_input_plan_falls_through() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("plan.md"), "# From file").unwrap();
        let got = resolve_plan(&json!({ "plan": "  " }), None, dir.path()).unwrap();
        assert_eq!(got.content, "# From file");
    }

    #[test]
    fn transcript_most_recent_plan_write_wins() {
        let dir = TempDir::new().unwrap();
        let path = transcript(
            &dir,
            &[
                write_entry("/repo/.claude/plans/first.md", "# First"),
                write_entry("/repo/src/main.rs", "fn main() {}"),
                write_entry("/repo/docs/plan-v2.md", "# Second"),
                write_entry("/repo/notes.md", "# Not a plan"),
            ],
        );
        assert_eq!(plan_from_transcript(&path).as_deref(), Some("# Second"));
    }

    #[test]
    fn transcript_skips_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let path = transcript(
            &dir,
            &[
                write_entry("/repo/plan.md", "# Good"),
                "{ this is not json".to_string(),
                "".to_string(),
                "[1, 2".to_string(),
                json!({ "type": "assistant", "message": "no content array" }).to_string(),
            ],
        );
        assert_eq!(plan_from_transcript(&path).as_deref(), Some("# Good"));
    }

    #[test]
    fn transcript_ignores_user_entries() {
        let dir = TempDir::new().unwrap();
        let mut user = serde_json::from_str::<Value>(&write_entry("/r/plan.md", "# User")).unwrap();
        user["type"] = json!("user");
        let path = transcript(&dir, &[user.to_string()]);
        assert_eq!(plan_from_transcript(&path), None);
    }

    #[test]
    fn missing_transcript_falls_back_to_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".claude")).unwrap();
        std::fs::write(dir.path().join(".claude/plan.md"), "# Claude plan").unwrap();
        std::fs::write(dir.path().join("plan.md"), "# Root plan").unwrap();

        let got = resolve_plan(
            &json!({}),
            Some(&dir.path().join("missing.jsonl")),
            dir.path(),
        )
        .unwrap();
        assert_eq!(got.content, "# Claude plan");
        assert_eq!(got.source, PlanSource::File(dir.path().join(".claude/plan.md")));
    }

    #[test]
    fn empty_candidate_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".claude")).unwrap();
        std::fs::write(dir.path().join(".claude/plan.md"), "\n\n").unwrap();
        std::fs::write(dir.path().join("plan.md"), "# Root plan").unwrap();
        let (path, content) = plan_from_candidates(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("plan.md"));
        assert_eq!(content, "# Root plan");
    }

    #[test]
    fn nothing_found_is_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_plan(&json!({}), None, dir.path()), None);
    }

    #[test]
    fn plan_path_heuristic() {
        assert!(is_plan_path("/r/plan.md"));
        assert!(is_plan_path("/r/PLAN.md"));
        assert!(is_plan_path("/r/docs/my-plan-v2.md"));
        assert!(is_plan_path("/home/u/.claude/plans/quiet-fox.md"));
        assert!(is_plan_path(r"C:\r\.claude\plan\x.txt"));
        assert!(!is_plan_path("/r/plan/readme.md"));
        assert!(!is_plan_path("/r/plan.txt"));
        assert!(!is_plan_path("/r/notes.md"));
        assert!(!is_plan_path("/r/explanation.md"));
        assert!(!is_plan_path("/r/docs/airplane.md"));
        assert!(is_plan_path("implementation_plan.md"));
        assert!(is_plan_path(r"C:\r\docs\Rollout.Plan.md"));
    }

    #[test]
    fn title_prefers_heading() {
        assert_eq!(plan_title("intro\n\n# Add OAuth\n\nsteps"), "Add OAuth");
        assert_eq!(plan_title("\n  First line\nsecond"), "First line");
        assert_eq!(plan_title(""), "Untitled plan");
        let long = "x".repeat(300);
        assert_eq!(plan_title(&long).chars().count(), MAX_TITLE_LEN);
    }
}
