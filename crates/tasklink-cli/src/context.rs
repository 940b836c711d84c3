use crate::cmd::connect;
use anyhow::Context as _;
use std::path::{Path, PathBuf};
use tasklink_core::api::ApiClient;
use tasklink_core::paths;
use tasklink_core::store::{ResolvedLink, Store};
use tasklink_core::TasklinkError;

/// Per-invocation state: the config store, the folder being worked in, and
/// output mode. Built once in `main` and passed to every command.
pub struct Ctx {
    pub store: Store,
    pub cwd: PathBuf,
    pub json: bool,
}

impl Ctx {
    pub fn new(config_dir: Option<&Path>, cwd: Option<&Path>, json: bool) -> anyhow::Result<Self> {
        let store = Store::open(config_dir).context("failed to locate config directory")?;
        Ok(Self {
            store,
            cwd: resolve_cwd(cwd),
            json,
        })
    }

    pub fn link(&self) -> Option<ResolvedLink> {
        self.store.find_link(&self.cwd)
    }

    /// Link for the working folder, running the connect flow when there is
    /// none yet.
    pub fn require_link(&self) -> anyhow::Result<ResolvedLink> {
        if let Some(link) = self.link() {
            return Ok(link);
        }
        let folder = paths::folder_key(&self.cwd);
        eprintln!("No project connected for {folder}; starting connect flow.");
        match connect::authorize(&self.store, &folder, &paths::default_base_url())? {
            Some(link) => Ok(ResolvedLink { folder, link }),
            None => Err(TasklinkError::NotConnected(folder).into()),
        }
    }

    pub fn client(&self) -> anyhow::Result<ApiClient<'_>> {
        let link = self.require_link()?;
        Ok(ApiClient::new(&self.store, link)?)
    }
}

/// Absolute working folder: `explicit` (made absolute) or the process cwd.
pub fn resolve_cwd(explicit: Option<&Path>) -> PathBuf {
    let current = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    match explicit {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => current.join(p),
        None => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_cwd_is_kept() {
        assert_eq!(
            resolve_cwd(Some(Path::new("/work/app"))),
            PathBuf::from("/work/app")
        );
    }

    #[test]
    fn relative_cwd_is_joined() {
        let got = resolve_cwd(Some(Path::new("sub")));
        assert!(got.is_absolute() || got.starts_with("."));
        assert!(got.ends_with("sub"));
    }
}
