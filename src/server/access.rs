//! Access list loading (spec §4.4): a banlist or allowlist is a newline-delimited file
//! of usernames, exactly as the original server's `-B`/`-AL` flags read it.

use std::path::Path;

use crate::error::{Result, TemStreamError};
use crate::message::Access;

pub fn load(path: &Path, ban_list: bool) -> Result<Access> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| TemStreamError::Resource(format!("reading access list {path:?}: {e}")))?;
    let mut access = Access::new(ban_list);
    for line in contents.lines() {
        let line = line.trim();
        if !line.is_empty() {
            access.members.insert(line.to_string());
        }
    }
    Ok(access)
}

/// Persist the current member set back to `path`, one name per line. Called on clean
/// shutdown so runtime bans/unbans (via `BanUser`) survive a restart.
pub fn save(path: &Path, access: &Access) -> Result<()> {
    let mut names: Vec<&str> = access.members.iter().map(|s| s.as_str()).collect();
    names.sort_unstable();
    let body = names.join("\n");
    std::fs::write(path, body)
        .map_err(|e| TemStreamError::Resource(format!("writing access list {path:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_skips_blank_lines() {
        let dir = std::env::temp_dir().join(format!("temstream-access-test-{}", std::process::id()));
        std::fs::write(&dir, "alice\n\nbob\n  \ncarol\n").unwrap();
        let access = load(&dir, true).unwrap();
        assert_eq!(access.members.len(), 3);
        assert!(access.members.contains("alice"));
        std::fs::remove_file(&dir).ok();
    }
}
