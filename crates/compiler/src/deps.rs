use crate::config::SearchPath;
use crate::error::{Error, Location, Result};
use crate::imputil::{ImportRecord, Importer, ModuleNameExt};
use parser::{ImportNames, Span, Stmt, StmtWithSpan};
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Imports of one module as seen by scanning its source.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Every module the generated package must import, sorted. The
    /// importing module and its ancestor packages are left out.
    pub deps: BTreeSet<String>,
    /// Distinct resolved modules in first-import order.
    pub records: Vec<ImportRecord>,
}

impl Discovery {
    pub fn sources(&self) -> impl Iterator<Item = &ImportRecord> {
        self.records.iter().filter(|r| !r.is_native())
    }
}

/// Finds the imports of module `modname`. `source` is the file read, which
/// may be a cached copy; `script` is where the module lives and anchors
/// relative resolution.
pub fn discover(
    source: &Path,
    script: &Path,
    modname: &str,
    search_path: &SearchPath,
    absolute_import: bool,
) -> Result<Discovery> {
    let src = fs::read_to_string(source).map_err(Error::io(source))?;
    let module = parser::parse(&src).map_err(|e| Error::syntax(modname, &src, &e))?;
    let mut found = Vec::new();
    import_statements(&module.body, &mut found);

    let mut importer = Importer::new(search_path, modname, script, absolute_import);
    let resolution = |message: String, span: Span| Error::Resolution {
        module: modname.to_string(),
        location: Some(Location::of(&src, span)),
        message,
    };
    for (stmt, span) in found {
        match stmt {
            Stmt::Import(aliases) => {
                for alias in aliases {
                    importer.resolve(alias.name).map_err(|m| resolution(m, span))?;
                }
            }
            Stmt::ImportFrom {
                module: Some("__future__"),
                level: 0,
                ..
            } => (),
            Stmt::ImportFrom {
                module,
                names,
                level,
            } => {
                let package = importer
                    .resolve_from(*module, *level)
                    .map_err(|m| resolution(m, span))?;
                if let ImportNames::List(aliases) = names {
                    for alias in aliases {
                        importer.resolve_submodule(&package, alias.name);
                    }
                }
            }
            _ => (),
        }
    }

    let parents: FxHashSet<&str> = modname.parent_packages().into_iter().collect();
    let mut seen = FxHashSet::default();
    let mut discovery = Discovery::default();
    for record in importer.into_records() {
        for name in record.name.name_chain() {
            if name != modname && !parents.contains(name) {
                discovery.deps.insert(name.to_string());
            }
        }
        if seen.insert(record.name.clone()) {
            discovery.records.push(record);
        }
    }
    log::debug!("{modname} depends on {:?}", discovery.deps);
    Ok(discovery)
}

fn import_statements<'s, 'a>(stmts: &'s [StmtWithSpan<'a>], out: &mut Vec<(&'s Stmt<'a>, Span)>) {
    for (stmt, span) in stmts {
        match stmt {
            Stmt::Import(_) | Stmt::ImportFrom { .. } => out.push((stmt, *span)),
            Stmt::If { body, orelse, .. }
            | Stmt::While { body, orelse, .. }
            | Stmt::For { body, orelse, .. } => {
                import_statements(body, out);
                import_statements(orelse, out);
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                import_statements(body, out);
                for h in handlers {
                    import_statements(&h.body, out);
                }
                import_statements(orelse, out);
                import_statements(finalbody, out);
            }
            Stmt::With { body, .. }
            | Stmt::FunctionDef { body, .. }
            | Stmt::ClassDef { body, .. } => import_statements(body, out),
            _ => (),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tree(files: &[(&str, &str)]) -> (tempfile::TempDir, SearchPath) {
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
        let search = dir.path().join("search");
        fs::create_dir_all(search.join("src/__python__/sys")).unwrap();
        (dir, SearchPath::new([search]))
    }

    #[test]
    fn ancestors_are_excluded() {
        let main = "import sys\nimport mypkg\nimport mypkg.util\n\ndef f():\n    from . import other\n";
        let (dir, path) = tree(&[
            ("root/mypkg/__init__.py", ""),
            ("root/mypkg/main.py", main),
            ("root/mypkg/util.py", ""),
            ("root/mypkg/other.py", ""),
        ]);
        let script = dir.path().join("root/mypkg/main.py");
        let d = discover(&script, &script, "mypkg.main", &path, true).unwrap();
        assert_eq!(
            d.deps.iter().map(String::as_str).collect::<Vec<_>>(),
            ["mypkg.other", "mypkg.util", "sys"]
        );
        let sources: Vec<_> = d.sources().map(|r| r.name.as_str()).collect();
        assert_eq!(sources, ["mypkg", "mypkg.util", "mypkg.other"]);
    }

    #[test]
    fn reads_cached_copy_relative_to_script() {
        let (dir, path) = tree(&[
            ("root/a.py", ""),
            ("root/__pycache__/b.py", "import a\n"),
        ]);
        let d = discover(
            &dir.path().join("root/__pycache__/b.py"),
            &dir.path().join("root/b.py"),
            "b",
            &path,
            false,
        )
        .unwrap();
        assert_eq!(d.deps.into_iter().collect::<Vec<_>>(), ["a"]);
        assert_eq!(d.records[0].script(), Some(dir.path().join("root/a.py").as_path()));
    }

    #[test]
    fn module_never_depends_on_itself() {
        let (dir, path) = tree(&[("root/a.py", "import a\nimport sys\n")]);
        let script = dir.path().join("root/a.py");
        let d = discover(&script, &script, "a", &path, false).unwrap();
        assert_eq!(d.deps.into_iter().collect::<Vec<_>>(), ["sys"]);
    }

    #[test]
    fn unresolved_import_is_located() {
        let (dir, path) = tree(&[("root/m.py", "x = 1\nimport missing\n")]);
        let script: PathBuf = dir.path().join("root/m.py");
        let e = discover(&script, &script, "m", &path, false).unwrap_err();
        assert_eq!(e.to_string(), "m:2:1: no module named 'missing'");
    }
}
