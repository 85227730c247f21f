use anyhow::anyhow;
use neovate_domain::paths;
use std::path::PathBuf;

pub(crate) fn optional_trimmed_path_from_env(name: &str) -> anyhow::Result<Option<PathBuf>> {
    let value = match std::env::var_os(name) {
        Some(value) => value,
        None => return Ok(None),
    };

    let value = value.to_string_lossy();
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("{name} is set but empty"));
    }

    Ok(Some(PathBuf::from(trimmed)))
}

fn home_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var_os("HOME").ok_or_else(|| anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(home))
}

/// `NEOVATE_ROOT` when set, otherwise `$HOME/.neovate`.
pub(crate) fn resolve_neovate_root() -> anyhow::Result<PathBuf> {
    if let Some(root) = optional_trimmed_path_from_env(paths::NEOVATE_ROOT_ENV)? {
        return Ok(root);
    }
    Ok(paths::default_root(&home_dir()?))
}
