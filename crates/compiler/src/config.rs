use crate::error::{Error, Result};
use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};

/// Ordered workspace roots consulted when resolving imports. Roots are only
/// ever appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath {
    roots: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut path = SearchPath::default();
        for root in roots {
            path.push(root);
        }
        path
    }

    /// Parses a platform path list such as the value of `PYGOC_PATH`.
    pub fn from_env_value(value: &OsStr) -> Self {
        Self::new(env::split_paths(value).filter(|p| !p.as_os_str().is_empty()))
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn contains(&self, root: &Path) -> bool {
        self.roots.iter().any(|r| r == root)
    }

    /// Appends `root` unless it is already present. Returns whether the path
    /// grew.
    pub fn push(&mut self, root: PathBuf) -> bool {
        if self.contains(&root) {
            return false;
        }
        self.roots.push(root);
        true
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::Configuration(
                "search path is empty; pass --search-root or set PYGOC_PATH".to_string(),
            ));
        }
        Ok(())
    }
}

/// What to do when recursive compilation reaches a module again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CyclePolicy {
    /// Treat a module compiled earlier in the run as satisfied.
    #[default]
    Guard,
    /// Compile every discovered module again. Does not terminate on
    /// import cycles that include the starting module.
    Unbounded,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Compile source-backed dependencies too.
    pub recursive: bool,
    /// Write each module into its cache workspace and add the workspace to
    /// the search path.
    pub write_cache: bool,
    pub cycle_policy: CyclePolicy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn search_path_is_append_only_and_deduplicated() {
        let mut path = SearchPath::new([PathBuf::from("/a"), PathBuf::from("/a")]);
        assert_eq!(path.roots(), [PathBuf::from("/a")]);
        assert!(path.push(PathBuf::from("/b")));
        assert!(!path.push(PathBuf::from("/a")));
        assert_eq!(path.roots().len(), 2);
    }

    #[test]
    fn env_value_is_split() {
        let value = env::join_paths(["/x", "/y"]).unwrap();
        let path = SearchPath::from_env_value(&value);
        assert_eq!(path.roots(), [PathBuf::from("/x"), PathBuf::from("/y")]);
        assert!(SearchPath::from_env_value(OsStr::new("")).check().is_err());
    }

    #[test]
    fn cycle_policy_names() {
        assert_eq!(CyclePolicy::from_str("guard").unwrap(), CyclePolicy::Guard);
        assert_eq!(CyclePolicy::from_str("unbounded").unwrap(), CyclePolicy::Unbounded);
        assert_eq!(CyclePolicy::Unbounded.to_string(), "unbounded");
        assert!(CyclePolicy::from_str("never").is_err());
    }
}
