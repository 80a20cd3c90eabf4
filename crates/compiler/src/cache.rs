use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory that generated Go packages live under inside a workspace.
pub const PACKAGE_ROOT: &str = "__python__";

/// On-disk locations used for one module when writing into the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFolders {
    /// `<script dir>/__pycache__`
    pub cache: PathBuf,
    /// `<cache>/<stem>.pygoc`, a workspace root added to the search path.
    pub workspace: PathBuf,
    /// `<workspace>/src/__python__/<a/b/c>`
    pub module_dir: PathBuf,
}

impl ModuleFolders {
    pub fn new(script: &Path, modname: &str) -> Self {
        let dir = script.parent().unwrap_or(Path::new(""));
        let cache = dir.join("__pycache__");
        let stem = script
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let workspace = cache.join(format!("{stem}.pygoc"));
        let module_dir = modname
            .split('.')
            .fold(workspace.join("src").join(PACKAGE_ROOT), |p, part| p.join(part));
        ModuleFolders {
            cache,
            workspace,
            module_dir,
        }
    }

    pub fn module_file(&self) -> PathBuf {
        self.module_dir.join("module.go")
    }

    /// Copy of the script kept next to the cached output.
    pub fn script_copy(&self, script: &Path) -> Option<PathBuf> {
        script.file_name().map(|name| self.cache.join(name))
    }

    pub fn write_module(&self, code: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.module_dir).map_err(Error::io(&self.module_dir))?;
        let file = self.module_file();
        fs::write(&file, code).map_err(Error::io(&file))?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let folders = ModuleFolders::new(Path::new("/src/pkg/util.py"), "pkg.util");
        assert_eq!(folders.cache, Path::new("/src/pkg/__pycache__"));
        assert_eq!(folders.workspace, Path::new("/src/pkg/__pycache__/util.pygoc"));
        assert_eq!(
            folders.module_file(),
            Path::new("/src/pkg/__pycache__/util.pygoc/src/__python__/pkg/util/module.go")
        );
        assert_eq!(
            folders.script_copy(Path::new("/src/pkg/util.py")).unwrap(),
            Path::new("/src/pkg/__pycache__/util.py")
        );
    }

    #[test]
    fn writes_module_file() {
        let dir = tempfile::tempdir().unwrap();
        let folders = ModuleFolders::new(&dir.path().join("m.py"), "a.m");
        let file = folders.write_module("package m\n").unwrap();
        assert_eq!(fs::read_to_string(file).unwrap(), "package m\n");
    }
}
