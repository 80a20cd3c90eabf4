use crate::cache::PACKAGE_ROOT;
use crate::config::SearchPath;
use codegen::{FutureFeatures, Import, ImportBinding, ImportResolver};
use easy_ext::ext;
use parser::{Alias, Expr, ImportNames, Module, Stmt};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strum::{EnumIter, EnumString, IntoStaticStr};

/// Prefix marking a module as a hand-written Go package.
pub const NATIVE_PREFIX: &str = "__go__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum FutureFeature {
    AbsoluteImport,
    Division,
    Generators,
    NestedScopes,
    PrintFunction,
    UnicodeLiterals,
    WithStatement,
}

/// Reads the `from __future__ import` directives at the top of a module,
/// after an optional docstring.
pub fn parse_future_features(module: &Module<'_>) -> codegen::Result<FutureFeatures> {
    let mut features = FutureFeatures::default();
    let mut at_top = true;
    for (i, (stmt, span)) in module.body.iter().enumerate() {
        let names = match stmt {
            Stmt::ImportFrom {
                module: Some("__future__"),
                names,
                level: 0,
            } => names,
            Stmt::Expr((Expr::Str(_), _)) if i == 0 => continue,
            _ => {
                at_top = false;
                continue;
            }
        };
        if !at_top {
            return Err(codegen::Error::Codegen {
                message: "from __future__ imports must occur at the beginning of the file"
                    .to_string(),
                span: *span,
            });
        }
        let ImportNames::List(aliases) = names else {
            return Err(codegen::Error::Codegen {
                message: "future feature * is not defined".to_string(),
                span: *span,
            });
        };
        for alias in aliases {
            let feature = FutureFeature::from_str(alias.name).map_err(|_| codegen::Error::Codegen {
                message: format!("future feature {} is not defined", alias.name),
                span: *span,
            })?;
            features.enable(feature);
        }
    }
    Ok(features)
}

#[ext(FutureFeaturesExt)]
impl FutureFeatures {
    fn enable(&mut self, feature: FutureFeature) {
        let flag = match feature {
            FutureFeature::AbsoluteImport => &mut self.absolute_import,
            FutureFeature::Division => &mut self.division,
            FutureFeature::Generators => &mut self.generators,
            FutureFeature::NestedScopes => &mut self.nested_scopes,
            FutureFeature::PrintFunction => &mut self.print_function,
            FutureFeature::UnicodeLiterals => &mut self.unicode_literals,
            FutureFeature::WithStatement => &mut self.with_statement,
        };
        *flag = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Python source that this tool compiles.
    Source(PathBuf),
    /// A Go package that already exists.
    Native,
}

/// A resolved module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    /// Dotted name, or `__go__/a/b` for hand-written Go packages.
    pub name: String,
    pub origin: Origin,
    /// Found relative to the importing package.
    pub relative: bool,
}

impl ImportRecord {
    pub fn is_native(&self) -> bool {
        self.origin == Origin::Native
    }

    pub fn script(&self) -> Option<&Path> {
        match &self.origin {
            Origin::Source(p) => Some(p.as_path()),
            Origin::Native => None,
        }
    }
}

/// Go import path of the package generated for `modname`.
pub fn package_name(modname: &str) -> String {
    if modname.starts_with("__go__/") {
        format!("{PACKAGE_ROOT}/{modname}")
    } else {
        format!("{PACKAGE_ROOT}/{}", modname.replace('.', "/"))
    }
}

#[ext(ModuleNameExt)]
pub impl str {
    /// Enclosing packages of a dotted name, innermost first.
    fn parent_packages(&self) -> Vec<&str> {
        self.rmatch_indices('.').map(|(i, _)| &self[..i]).collect()
    }

    /// Every prefix of a dotted name, outermost first, ending with the name.
    fn name_chain(&self) -> Vec<&str> {
        self.match_indices('.')
            .map(|(i, _)| &self[..i])
            .chain([self])
            .collect()
    }
}

/// Resolves the imports of one module against its source root and the
/// search path.
pub struct Importer<'p> {
    search_path: &'p SearchPath,
    modname: String,
    /// Directory the top-level package of the module lives in.
    source_root: PathBuf,
    /// Package the module belongs to; the module itself for `__init__.py`.
    package: String,
    absolute_import: bool,
    records: Vec<ImportRecord>,
}

impl<'p> Importer<'p> {
    pub fn new(
        search_path: &'p SearchPath,
        modname: &str,
        script: &Path,
        absolute_import: bool,
    ) -> Self {
        let is_package = script.file_name().is_some_and(|n| n == "__init__.py");
        let mut source_root = script.parent().unwrap_or(Path::new("")).to_path_buf();
        let climb = modname.matches('.').count() + usize::from(is_package);
        for _ in 0..climb {
            source_root.pop();
        }
        let package = if is_package {
            modname.to_string()
        } else {
            modname.parent_packages().first().copied().unwrap_or_default().to_string()
        };
        Importer {
            search_path,
            modname: modname.to_string(),
            source_root,
            package,
            absolute_import,
            records: Vec::new(),
        }
    }

    /// Modules resolved so far, in resolution order.
    pub fn records(&self) -> &[ImportRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ImportRecord> {
        self.records
    }

    fn source_file(&self, name: &str) -> Option<PathBuf> {
        let base = name
            .split('.')
            .fold(self.source_root.clone(), |p, part| p.join(part));
        let file = base.with_extension("py");
        if file.is_file() {
            return Some(file);
        }
        let init = base.join("__init__.py");
        init.is_file().then_some(init)
    }

    fn precompiled(&self, name: &str) -> bool {
        self.search_path.roots().iter().any(|root| {
            let dir = name
                .split('.')
                .fold(root.join("src").join(PACKAGE_ROOT), |p, part| p.join(part));
            dir.is_dir()
        })
    }

    fn locate(&self, name: &str, relative: bool) -> Option<ImportRecord> {
        if let Some(native) = name.strip_prefix("__go__.") {
            return Some(ImportRecord {
                name: format!("{NATIVE_PREFIX}/{}", native.replace('.', "/")),
                origin: Origin::Native,
                relative,
            });
        }
        if let Some(script) = self.source_file(name) {
            return Some(ImportRecord {
                name: name.to_string(),
                origin: Origin::Source(script),
                relative,
            });
        }
        self.precompiled(name).then(|| ImportRecord {
            name: name.to_string(),
            origin: Origin::Native,
            relative,
        })
    }

    /// Resolves an absolute dotted name, trying the importing package first
    /// unless absolute imports are in effect.
    pub fn resolve(&mut self, name: &str) -> Result<ImportRecord, String> {
        let implicit = (!self.absolute_import && !self.package.is_empty())
            .then(|| format!("{}.{name}", self.package))
            .and_then(|full| {
                self.source_file(&full).map(|script| ImportRecord {
                    name: full,
                    origin: Origin::Source(script),
                    relative: true,
                })
            });
        let record = implicit
            .or_else(|| self.locate(name, false))
            .ok_or_else(|| format!("no module named '{name}'"))?;
        log::trace!("{} resolved {name} to {:?}", self.modname, record.origin);
        self.records.push(record.clone());
        Ok(record)
    }

    /// Package an explicit relative import with `level` dots refers to.
    fn relative_base(&self, level: usize) -> Result<String, String> {
        let mut base = self.package.as_str();
        for _ in 1..level {
            base = base.parent_packages().first().copied().unwrap_or_default();
            if base.is_empty() {
                break;
            }
        }
        if base.is_empty() {
            return Err("attempted relative import beyond top-level package".to_string());
        }
        Ok(base.to_string())
    }

    /// Resolves the module a `from` import reads from.
    pub fn resolve_from(&mut self, module: Option<&str>, level: usize) -> Result<ImportRecord, String> {
        if level == 0 {
            return self.resolve(module.unwrap_or_default());
        }
        let base = self.relative_base(level)?;
        let full = match module {
            Some(m) => format!("{base}.{m}"),
            None => base,
        };
        let record = self
            .locate(&full, true)
            .ok_or_else(|| format!("no module named '{full}'"))?;
        self.records.push(record.clone());
        Ok(record)
    }

    /// Submodule `name` of package `package`, if one exists.
    pub fn resolve_submodule(&mut self, package: &ImportRecord, name: &str) -> Option<ImportRecord> {
        if package.name.starts_with(NATIVE_PREFIX) {
            return None;
        }
        let record = self.locate(&format!("{}.{name}", package.name), package.relative)?;
        self.records.push(record.clone());
        Some(record)
    }
}

impl ImportResolver for Importer<'_> {
    fn import(&mut self, alias: &Alias<'_>) -> Result<Import, String> {
        if alias.name.starts_with("__go__.") {
            return Err("for native imports use \"from __go__.xyz import ...\" syntax".to_string());
        }
        let record = self.resolve(alias.name)?;
        let mut import = Import::new(record.name.as_str());
        let depth = record.name.matches('.').count();
        let binding = match alias.asname {
            Some(asname) => ImportBinding::Module {
                name: asname.to_string(),
                index: depth,
            },
            None => ImportBinding::Module {
                name: alias.name.split('.').next().unwrap_or(alias.name).to_string(),
                index: depth - alias.name.matches('.').count(),
            },
        };
        import.add_binding(binding);
        Ok(import)
    }

    fn import_from(
        &mut self,
        module: Option<&str>,
        level: usize,
        names: &ImportNames<'_>,
    ) -> Result<Vec<Import>, String> {
        let package = self.resolve_from(module, level)?;
        let aliases = match names {
            ImportNames::Star => {
                let mut import = Import::new(package.name.as_str());
                import.add_binding(ImportBinding::Star);
                return Ok(vec![import]);
            }
            ImportNames::List(aliases) => aliases,
        };
        let mut members = Import::new(package.name.as_str());
        let mut imports = Vec::new();
        for alias in aliases {
            let bound = alias.asname.unwrap_or(alias.name).to_string();
            match self.resolve_submodule(&package, alias.name) {
                Some(sub) => {
                    let mut import = Import::new(sub.name.as_str());
                    import.add_binding(ImportBinding::Module {
                        name: bound,
                        index: sub.name.matches('.').count(),
                    });
                    imports.push(import);
                }
                None => members.add_binding(ImportBinding::Member {
                    name: bound,
                    attr: alias.name.to_string(),
                }),
            }
        }
        if !members.bindings.is_empty() {
            imports.insert(0, members);
        }
        Ok(imports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use strum::IntoEnumIterator;

    fn features(src: &str) -> codegen::Result<FutureFeatures> {
        parse_future_features(&parser::parse(src).unwrap())
    }

    #[test]
    fn future_features_at_top() {
        let f = features("'''doc'''\nfrom __future__ import division, absolute_import\nx = 1\n")
            .unwrap();
        assert!(f.division && f.absolute_import && !f.print_function);
        for feature in FutureFeature::iter() {
            let name: &'static str = feature.into();
            assert!(features(&format!("from __future__ import {name}\n")).is_ok());
        }
    }

    #[test]
    fn misplaced_or_unknown_future_features() {
        let e = features("x = 1\nfrom __future__ import division\n").unwrap_err();
        assert_eq!(e.to_string(), "from __future__ imports must occur at the beginning of the file");
        let e = features("from __future__ import braces\n").unwrap_err();
        assert_eq!(e.to_string(), "future feature braces is not defined");
    }

    #[test]
    fn package_names() {
        assert_eq!(package_name("a.b.c"), "__python__/a/b/c");
        assert_eq!(package_name("__go__/fmt"), "__python__/__go__/fmt");
        assert_eq!("a.b.c".parent_packages(), ["a.b", "a"]);
        assert_eq!("a.b.c".name_chain(), ["a", "a.b", "a.b.c"]);
        assert!("a".parent_packages().is_empty());
    }

    /// root/pkg/{__init__,main,util}.py, root/top.py, search/src/__python__/sys
    fn layout() -> (tempfile::TempDir, SearchPath) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("pkg")).unwrap();
        for f in ["pkg/__init__.py", "pkg/main.py", "pkg/util.py", "top.py"] {
            fs::write(root.join(f), "").unwrap();
        }
        let search = dir.path().join("search");
        fs::create_dir_all(search.join("src/__python__/sys")).unwrap();
        (dir, SearchPath::new([search]))
    }

    #[test]
    fn resolves_sources_and_natives() {
        let (dir, path) = layout();
        let script = dir.path().join("root/pkg/main.py");
        let mut importer = Importer::new(&path, "pkg.main", &script, true);
        let util = importer.resolve("pkg.util").unwrap();
        assert_eq!(util.script(), Some(dir.path().join("root/pkg/util.py").as_path()));
        assert!(importer.resolve("sys").unwrap().is_native());
        assert_eq!(importer.resolve("__go__.fmt").unwrap().name, "__go__/fmt");
        assert_eq!(importer.resolve("nope").unwrap_err(), "no module named 'nope'");
        assert!(importer.resolve("util").is_err());
        assert_eq!(importer.records().len(), 3);
    }

    #[test]
    fn implicit_relative_only_without_absolute_import() {
        let (dir, path) = layout();
        let script = dir.path().join("root/pkg/main.py");
        let mut importer = Importer::new(&path, "pkg.main", &script, false);
        let record = importer.resolve("util").unwrap();
        assert_eq!(record.name, "pkg.util");
        assert!(record.relative);
    }

    #[test]
    fn explicit_relative_imports() {
        let (dir, path) = layout();
        let script = dir.path().join("root/pkg/main.py");
        let mut importer = Importer::new(&path, "pkg.main", &script, true);
        let names = ImportNames::List(vec![
            Alias { name: "util", asname: None },
            Alias { name: "helper", asname: Some("h") },
        ]);
        let imports = importer.import_from(None, 1, &names).unwrap();
        assert_eq!(imports[0].name, "pkg");
        assert_eq!(
            imports[0].bindings,
            [ImportBinding::Member { name: "h".to_string(), attr: "helper".to_string() }]
        );
        assert_eq!(imports[1].name, "pkg.util");
        assert_eq!(
            imports[1].bindings,
            [ImportBinding::Module { name: "util".to_string(), index: 1 }]
        );
        assert_eq!(
            importer.import_from(None, 2, &names).unwrap_err(),
            "attempted relative import beyond top-level package"
        );
    }

    #[test]
    fn import_binds_first_component() {
        let (dir, path) = layout();
        let script = dir.path().join("root/top.py");
        let mut importer = Importer::new(&path, "top", &script, false);
        let import = importer.import(&Alias { name: "pkg.util", asname: None }).unwrap();
        assert_eq!(import.name, "pkg.util");
        assert_eq!(import.bindings, [ImportBinding::Module { name: "pkg".to_string(), index: 0 }]);
        let import = importer.import(&Alias { name: "pkg.util", asname: Some("u") }).unwrap();
        assert_eq!(import.bindings, [ImportBinding::Module { name: "u".to_string(), index: 1 }]);
    }

    #[test]
    fn native_packages_need_from_import() {
        let (dir, path) = layout();
        let script = dir.path().join("root/top.py");
        let mut importer = Importer::new(&path, "top", &script, false);
        let e = importer.import(&Alias { name: "__go__.fmt", asname: None }).unwrap_err();
        assert_eq!(e, "for native imports use \"from __go__.xyz import ...\" syntax");
        let names = ImportNames::List(vec![Alias { name: "Println", asname: None }]);
        let imports = importer.import_from(Some("__go__.fmt"), 0, &names).unwrap();
        assert_eq!(imports[0].name, "__go__/fmt");
        assert_eq!(
            imports[0].bindings,
            [ImportBinding::Member { name: "Println".to_string(), attr: "Println".to_string() }]
        );
    }
}
