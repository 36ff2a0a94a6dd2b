//! Clone directory janitor (spec §5 "Shared resources").
//!
//! Local dist-git clones live at `<clone_base_path>/<ticket>/<package>`
//! (`DistGitClone::scoped_path`). On a schedule, any top-level ticket
//! directory older than `clone_janitor_max_age_days` (default 14) is
//! removed entirely, scoped to ticket-family-shaped names so the janitor
//! never touches anything that isn't one of its own clones.

use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use regex::Regex;

/// A top-level clone directory name looks like a tracker issue key, e.g.
/// `RHEL-12345`, the "ticket family" the janitor is scoped to.
fn looks_like_ticket_directory(name: &str) -> bool {
    Regex::new(r"(?i)^[a-z]+-\d+$").is_ok_and(|re| re.is_match(name))
}

/// Remove every ticket directory under `base_path` whose modification time
/// is older than `max_age`. Returns the names removed.
pub fn sweep(base_path: &str, max_age: Duration) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    let entries = match std::fs::read_dir(base_path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
        Err(e) => return Err(e).with_context(|| format!("reading clone base path {base_path}")),
    };

    let now = SystemTime::now();
    for entry in entries {
        let entry = entry.context("reading clone base path entry")?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !looks_like_ticket_directory(&name) {
            continue;
        }
        let metadata = entry.metadata().with_context(|| format!("stat'ing {name}"))?;
        if !metadata.is_dir() {
            continue;
        }
        let modified = metadata.modified().with_context(|| format!("reading mtime of {name}"))?;
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age < max_age {
            continue;
        }
        let path: std::path::PathBuf = Path::new(base_path).join(&name);
        std::fs::remove_dir_all(&path).with_context(|| format!("removing stale clone dir {}", path.display()))?;
        tracing::info!(ticket = %name, age_days = age.as_secs() / 86_400, "removed stale clone directory");
        removed.push(name);
    }
    Ok(removed)
}

/// Run [`sweep`] once every `interval`, forever, until `shutdown` fires.
pub async fn run(base_path: &str, max_age_days: u32, interval: Duration, shutdown: &tokio::sync::Notify) {
    let max_age = Duration::from_secs(u64::from(max_age_days) * 86_400);
    loop {
        if let Err(e) = sweep(base_path, max_age) {
            tracing::error!(error = %e, "clone janitor sweep failed");
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.notified() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_ticket_shaped_directory_names() {
        assert!(looks_like_ticket_directory("RHEL-12345"));
        assert!(looks_like_ticket_directory("rhel-1"));
        assert!(!looks_like_ticket_directory("scratch"));
        assert!(!looks_like_ticket_directory(".git"));
    }

    #[test]
    fn sweep_removes_only_old_ticket_directories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let base = tmp.path();

        let old = base.join("RHEL-1");
        std::fs::create_dir_all(&old).unwrap();
        let fresh = base.join("RHEL-2");
        std::fs::create_dir_all(&fresh).unwrap();
        let unrelated = base.join("not-a-ticket");
        std::fs::create_dir_all(&unrelated).unwrap();

        let old_time = filetime::FileTime::from_system_time(
            SystemTime::now() - Duration::from_secs(20 * 86_400),
        );
        filetime::set_file_mtime(&old, old_time).unwrap();

        let removed = sweep(base.to_str().unwrap(), Duration::from_secs(14 * 86_400)).unwrap();
        assert_eq!(removed, vec!["RHEL-1".to_string()]);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn sweep_of_missing_base_path_is_a_noop() {
        let removed = sweep("/does/not/exist/jotnar-clones", Duration::from_secs(1)).unwrap();
        assert!(removed.is_empty());
    }
}
