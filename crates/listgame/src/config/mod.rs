use std::path::{Component, Path, PathBuf};

use anyhow::{Result, bail};

pub const DATA_DIR: &str = ".listgame";
pub const DEFAULT_DB_FILE: &str = "logfile.sqlite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub home_dir: PathBuf,
    pub cwd: PathBuf,
    pub db_path: PathBuf,
    /// `None` selects the builtin catalog.
    pub catalog_path: Option<PathBuf>,
}

pub fn resolve_runtime_paths(
    home_dir: &Path,
    cwd: &Path,
    db_override: Option<&Path>,
    catalog_override: Option<&Path>,
) -> Result<RuntimePaths> {
    if !home_dir.is_absolute() {
        bail!("home_dir must be absolute: {}", home_dir.display());
    }
    if !cwd.is_absolute() {
        bail!("cwd must be absolute: {}", cwd.display());
    }

    let home_dir = normalize_lexical(home_dir);
    let cwd = normalize_lexical(cwd);
    let db_path = match db_override {
        Some(path) => resolve_user_path(path, &home_dir, &cwd)?,
        None => home_dir.join(DATA_DIR).join(DEFAULT_DB_FILE),
    };
    let catalog_path = catalog_override
        .map(|path| resolve_user_path(path, &home_dir, &cwd))
        .transpose()?;

    Ok(RuntimePaths {
        home_dir,
        cwd,
        db_path: normalize_lexical(&db_path),
        catalog_path,
    })
}

/// Default actor for queries that name none: the explicit value, then
/// `$LISTGAME_NICK`, then `$USER`, else any actor.
#[must_use]
pub fn resolve_nick(explicit: Option<&str>, env_nick: Option<&str>, env_user: Option<&str>) -> String {
    [explicit, env_nick, env_user]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|nick| !nick.is_empty())
        .unwrap_or("*")
        .to_string()
}

fn resolve_user_path(path: &Path, home_dir: &Path, cwd: &Path) -> Result<PathBuf> {
    let expanded = expand_tilde(path, home_dir)?;
    let resolved = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };

    Ok(normalize_lexical(&resolved))
}

fn expand_tilde(path: &Path, home_dir: &Path) -> Result<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => {
            let mut expanded = home_dir.to_path_buf();
            for component in components {
                expanded.push(component.as_os_str());
            }
            Ok(expanded)
        }
        Some(Component::Normal(first))
            if first
                .to_str()
                .is_some_and(|segment| segment.starts_with('~')) =>
        {
            bail!(
                "unsupported home expansion syntax (only `~` and `~/...` are supported): {}",
                path.display()
            )
        }
        _ => Ok(path.to_path_buf()),
    }
}

fn normalize_lexical(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            _ => normalized.push(component.as_os_str()),
        }
    }

    normalized
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{resolve_nick, resolve_runtime_paths};

    #[test]
    fn defaults_db_under_listgame_dir() {
        let paths = resolve_runtime_paths(
            Path::new("/home/tester"),
            Path::new("/work/repo"),
            None,
            None,
        )
        .expect("paths should resolve");

        assert_eq!(paths.home_dir, Path::new("/home/tester"));
        assert_eq!(paths.db_path, Path::new("/home/tester/.listgame/logfile.sqlite"));
        assert_eq!(paths.catalog_path, None);
    }

    #[test]
    fn expands_overrides_against_home_and_cwd() {
        let paths = resolve_runtime_paths(
            Path::new("/home/tester"),
            Path::new("/work/repo"),
            Some(Path::new("~/games/log.sqlite")),
            Some(Path::new("./conf/../conf/catalog.json")),
        )
        .expect("overrides should resolve");

        assert_eq!(paths.db_path, Path::new("/home/tester/games/log.sqlite"));
        assert_eq!(
            paths.catalog_path.as_deref(),
            Some(Path::new("/work/repo/conf/catalog.json"))
        );
    }

    #[test]
    fn rejects_relative_cwd() {
        let err = resolve_runtime_paths(Path::new("/home/tester"), Path::new("repo"), None, None)
            .expect_err("relative cwd must fail");
        assert!(
            err.to_string().contains("cwd must be absolute"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn rejects_tilde_username_syntax() {
        let err = resolve_runtime_paths(
            Path::new("/home/tester"),
            Path::new("/work/repo"),
            None,
            Some(Path::new("~someone/catalog.json")),
        )
        .expect_err("~username syntax must fail");
        assert!(
            err.to_string().contains("unsupported home expansion syntax"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn nick_falls_back_through_environment() {
        assert_eq!(resolve_nick(Some("Ell"), Some("x"), Some("y")), "Ell");
        assert_eq!(resolve_nick(None, Some(" "), Some("sigmund")), "sigmund");
        assert_eq!(resolve_nick(None, None, None), "*");
    }
}
