use crate::error::{Result, TasklinkError};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Config directory layout
// ---------------------------------------------------------------------------

pub const CONFIG_DIR_NAME: &str = ".tasklink";
pub const CONFIG_DIR_ENV: &str = "TASKLINK_HOME";

pub const PROJECTS_FILE: &str = "projects.json";
pub const TASK_MAP_FILE: &str = "task-map.json";
pub const ACTIVE_PLAN_FILE: &str = "active-plan.json";
pub const ACTIVE_TASK_FILE: &str = "active-task.json";
pub const SYNC_LOG_FILE: &str = "sync.log";

pub const BASE_URL_ENV: &str = "TASKLINK_BASE_URL";
pub const DEFAULT_BASE_URL: &str = "https://app.tasklink.dev";

/// Conventional plan files checked relative to the working directory, in order.
pub const PLAN_CANDIDATES: [&str; 2] = [".claude/plan.md", "plan.md"];

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve the config directory.
///
/// Priority:
/// 1. `explicit` (the `--config-dir` flag)
/// 2. `TASKLINK_HOME`
/// 3. `~/.tasklink`
pub fn config_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Some(p) = std::env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(p));
    }
    let home = home::home_dir().ok_or(TasklinkError::HomeNotFound)?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Remote service URL used when connecting a new folder.
pub fn default_base_url() -> String {
    std::env::var(BASE_URL_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

/// `path` and each of its ancestors, nearest first.
pub fn ancestors_of(path: &Path) -> impl Iterator<Item = &Path> {
    path.ancestors().filter(|p| !p.as_os_str().is_empty())
}

/// Canonical string key for a folder. Trailing separators are dropped so
/// `/a/b/` and `/a/b` address the same link.
pub fn folder_key(path: &Path) -> String {
    let s = path.to_string_lossy();
    let trimmed = s.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        s.into_owned()
    } else {
        trimmed.to_string()
    }
}

/// Main worktree of the git repository containing `cwd`, if any.
///
/// For a linked worktree this is the checkout that owns the shared `.git`
/// directory, so links made from the main checkout apply to every worktree.
pub fn git_main_worktree(cwd: &Path) -> Option<PathBuf> {
    let git = which::which("git").ok()?;
    let output = std::process::Command::new(git)
        .args([
            "rev-parse",
            "--path-format=absolute",
            "--git-common-dir",
        ])
        .current_dir(cwd)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let common = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
    if common.file_name().and_then(|n| n.to_str()) != Some(".git") {
        return None;
    }
    common.parent().map(Path::to_path_buf)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_wins() {
        let dir = config_dir(Some(Path::new("/tmp/tl"))).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/tl"));
    }

    #[test]
    fn folder_key_trims_trailing_separator() {
        assert_eq!(folder_key(Path::new("/work/app/")), "/work/app");
        assert_eq!(folder_key(Path::new("/work/app")), "/work/app");
        assert_eq!(folder_key(Path::new("/")), "/");
    }

    #[test]
    fn ancestors_nearest_first() {
        let all: Vec<_> = ancestors_of(Path::new("/a/b/c")).collect();
        assert_eq!(
            all,
            vec![
                Path::new("/a/b/c"),
                Path::new("/a/b"),
                Path::new("/a"),
                Path::new("/")
            ]
        );
    }

    #[test]
    fn non_repo_has_no_main_worktree() {
        let dir = tempfile::TempDir::new().unwrap();
        // A bare temp dir is not inside a repository (unless TMPDIR is).
        if let Some(found) = git_main_worktree(dir.path()) {
            assert!(!found.starts_with(dir.path()));
        }
    }
}
