use std::path::{Path, PathBuf};

pub const NEOVATE_ROOT_ENV: &str = "NEOVATE_ROOT";

pub fn sqlite_path(neovate_root: &Path) -> PathBuf {
    neovate_root.join("neovate.db")
}

pub fn default_root(home: &Path) -> PathBuf {
    home.join(".neovate")
}
