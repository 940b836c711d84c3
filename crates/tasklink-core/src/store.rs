use crate::error::Result;
use crate::io::{append_text, read_json, read_json_or_default, remove_if_exists, write_json};
use crate::paths;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Credentials and remote project binding for one connected folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectLink {
    pub access_token: String,
    /// Absent for links created from a plain project key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub project_id: String,
    pub project_name: String,
    pub base_url: String,
}

impl ProjectLink {
    /// True when the access token is expired or expires within `window`.
    pub fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - now <= window
    }

    /// Base URL without a trailing slash.
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Token expiry `lifetime_secs` after `now`. `None` for a negative lifetime
/// or one that leaves chrono's representable range.
pub fn expiry_after(now: DateTime<Utc>, lifetime_secs: i64) -> Option<DateTime<Utc>> {
    if lifetime_secs < 0 {
        return None;
    }
    Duration::try_seconds(lifetime_secs).and_then(|d| now.checked_add_signed(d))
}

/// The most recently uploaded plan awaiting review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivePlan {
    pub plan_id: String,
    pub project_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// The remote task currently in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTask {
    pub task_id: String,
}

/// A link found by [`Store::find_link`], with the folder it is stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLink {
    pub folder: String,
    pub link: ProjectLink,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle on the config directory. Constructed once per process and passed
/// to everything that touches persisted state.
///
/// Every mutation re-reads its file right before rewriting it. Concurrent
/// writers never see a partial file, but the last writer wins.
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    /// Open the store at `explicit`, `$TASKLINK_HOME` or `~/.tasklink`.
    pub fn open(explicit: Option<&Path>) -> Result<Self> {
        Ok(Self::at(paths::config_dir(explicit)?))
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    // -- project links ------------------------------------------------------

    pub fn links(&self) -> BTreeMap<String, ProjectLink> {
        read_json_or_default(&self.file(paths::PROJECTS_FILE))
    }

    /// Find the link for `cwd`: the nearest connected ancestor folder, then
    /// the git main worktree.
    pub fn find_link(&self, cwd: &Path) -> Option<ResolvedLink> {
        let links = self.links();
        if links.is_empty() {
            return None;
        }
        for dir in paths::ancestors_of(cwd) {
            let key = paths::folder_key(dir);
            if let Some(link) = links.get(&key) {
                return Some(ResolvedLink {
                    folder: key,
                    link: link.clone(),
                });
            }
        }
        let main = paths::git_main_worktree(cwd)?;
        let key = paths::folder_key(&main);
        let link = links.get(&key)?.clone();
        tracing::debug!("using main worktree link {key} for {}", cwd.display());
        Some(ResolvedLink { folder: key, link })
    }

    pub fn save_link(&self, folder: &str, link: &ProjectLink) -> Result<()> {
        let path = self.file(paths::PROJECTS_FILE);
        let mut links: BTreeMap<String, ProjectLink> = read_json_or_default(&path);
        links.insert(folder.to_string(), link.clone());
        write_json(&path, &links)
    }

    /// Remove the link stored under `folder`. Returns whether one existed.
    pub fn remove_link(&self, folder: &str) -> Result<bool> {
        let path = self.file(paths::PROJECTS_FILE);
        let mut links: BTreeMap<String, ProjectLink> = read_json_or_default(&path);
        if links.remove(folder).is_none() {
            return Ok(false);
        }
        write_json(&path, &links)?;
        Ok(true)
    }

    // -- task mapping -------------------------------------------------------

    pub fn task_map(&self) -> BTreeMap<String, String> {
        read_json_or_default(&self.file(paths::TASK_MAP_FILE))
    }

    pub fn remote_task_id(&self, local_id: &str) -> Option<String> {
        self.task_map().get(local_id).cloned()
    }

    pub fn map_task(&self, local_id: &str, remote_id: &str) -> Result<()> {
        let path = self.file(paths::TASK_MAP_FILE);
        let mut map: BTreeMap<String, String> = read_json_or_default(&path);
        map.insert(local_id.to_string(), remote_id.to_string());
        write_json(&path, &map)
    }

    pub fn unmap_task(&self, local_id: &str) -> Result<()> {
        let path = self.file(paths::TASK_MAP_FILE);
        let mut map: BTreeMap<String, String> = read_json_or_default(&path);
        if map.remove(local_id).is_some() {
            write_json(&path, &map)?;
        }
        Ok(())
    }

    // -- active plan --------------------------------------------------------

    pub fn active_plan(&self) -> Option<ActivePlan> {
        read_json(&self.file(paths::ACTIVE_PLAN_FILE))
    }

    pub fn set_active_plan(&self, plan: &ActivePlan) -> Result<()> {
        write_json(&self.file(paths::ACTIVE_PLAN_FILE), plan)
    }

    pub fn clear_active_plan(&self) -> Result<()> {
        remove_if_exists(&self.file(paths::ACTIVE_PLAN_FILE))
    }

    // -- active task --------------------------------------------------------

    pub fn active_task(&self) -> Option<ActiveTask> {
        read_json(&self.file(paths::ACTIVE_TASK_FILE))
    }

    pub fn set_active_task(&self, task_id: &str) -> Result<()> {
        write_json(
            &self.file(paths::ACTIVE_TASK_FILE),
            &ActiveTask {
                task_id: task_id.to_string(),
            },
        )
    }

    pub fn clear_active_task(&self) -> Result<()> {
        remove_if_exists(&self.file(paths::ACTIVE_TASK_FILE))
    }

    // -- sync log -----------------------------------------------------------

    pub fn log_path(&self) -> PathBuf {
        self.file(paths::SYNC_LOG_FILE)
    }

    /// Append one timestamped line to the sync log.
    pub fn append_log(&self, message: &str) -> Result<()> {
        let line = format!(
            "{} {}\n",
            Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            message.replace('\n', " ")
        );
        append_text(&self.log_path(), &line)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn link(project: &str) -> ProjectLink {
        ProjectLink {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at: DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            project_id: project.into(),
            project_name: format!("Project {project}"),
            base_url: "https://example.test/".into(),
        }
    }

    #[test]
    fn link_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path());
        store.save_link("/work/app", &link("p1")).unwrap();
        assert_eq!(store.links().get("/work/app"), Some(&link("p1")));
    }

    #[test]
    fn link_file_uses_camel_case() {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path());
        store.save_link("/work/app", &link("p1")).unwrap();
        let raw = std::fs::read_to_string(dir.path().join(paths::PROJECTS_FILE)).unwrap();
        assert!(raw.contains("\"accessToken\""));
        assert!(raw.contains("\"projectId\""));
        assert!(raw.contains("\"baseUrl\""));
    }

    #[test]
    fn find_link_walks_up_to_nearest_ancestor() {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path().join("cfg"));
        let root = dir.path().join("repo");
        let nested = root.join("pkg");
        store
            .save_link(&paths::folder_key(&root), &link("outer"))
            .unwrap();
        store
            .save_link(&paths::folder_key(&nested), &link("inner"))
            .unwrap();

        let found = store.find_link(&nested.join("src/deep")).unwrap();
        assert_eq!(found.link.project_id, "inner");
        assert_eq!(found.folder, paths::folder_key(&nested));

        let found = store.find_link(&root.join("docs")).unwrap();
        assert_eq!(found.link.project_id, "outer");
    }

    #[test]
    fn find_link_none_when_unlinked() {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path().join("cfg"));
        assert!(store.find_link(dir.path()).is_none());
    }

    #[test]
    fn corrupt_projects_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(paths::PROJECTS_FILE), "{\"/a\": {").unwrap();
        let store = Store::at(dir.path());
        assert!(store.links().is_empty());
        assert!(store.find_link(Path::new("/a")).is_none());
    }

    #[test]
    fn remove_link_reports_presence() {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path());
        store.save_link("/a", &link("p")).unwrap();
        assert!(store.remove_link("/a").unwrap());
        assert!(!store.remove_link("/a").unwrap());
        assert!(store.links().is_empty());
    }

    #[test]
    fn task_mapping_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path());
        store.map_task("3", "task_abc").unwrap();
        assert_eq!(store.remote_task_id("3").as_deref(), Some("task_abc"));
        store.unmap_task("3").unwrap();
        assert_eq!(store.remote_task_id("3"), None);
    }

    #[test]
    fn active_plan_round_trip_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path());
        let plan = ActivePlan {
            plan_id: "plan_1".into(),
            project_id: "p1".into(),
            session_id: Some("s1".into()),
            updated_at: Utc::now(),
        };
        store.set_active_plan(&plan).unwrap();
        assert_eq!(store.active_plan(), Some(plan));
        store.clear_active_plan().unwrap();
        assert_eq!(store.active_plan(), None);
    }

    #[test]
    fn active_task_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path());
        store.set_active_task("task_9").unwrap();
        assert_eq!(store.active_task().unwrap().task_id, "task_9");
        store.clear_active_task().unwrap();
        assert!(store.active_task().is_none());
    }

    #[test]
    fn expiry_window() {
        let l = link("p");
        let now = l.expires_at - Duration::minutes(4);
        assert!(l.expires_within(Duration::minutes(5), now));
        let now = l.expires_at - Duration::minutes(10);
        assert!(!l.expires_within(Duration::minutes(5), now));
        let now = l.expires_at + Duration::minutes(1);
        assert!(l.expires_within(Duration::minutes(5), now));
    }

    #[test]
    fn expiry_after_rejects_out_of_range_lifetimes() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, 3600), Some(now + Duration::hours(1)));
        assert_eq!(expiry_after(now, 0), Some(now));
        assert_eq!(expiry_after(now, -1), None);
        assert_eq!(expiry_after(now, 10_000_000_000_000), None);
        assert_eq!(expiry_after(now, i64::MAX), None);
    }

    #[test]
    fn append_log_writes_single_lines() {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path());
        store.append_log("first").unwrap();
        store.append_log("multi\nline").unwrap();
        let log = std::fs::read_to_string(store.log_path()).unwrap();
        let lines: Vec<_> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" first"));
        assert!(lines[1].ends_with(" multi line"));
    }
}
