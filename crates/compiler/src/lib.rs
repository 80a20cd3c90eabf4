pub mod cache;
mod config;
pub mod deps;
mod error;
pub mod imputil;

pub use cache::ModuleFolders;
pub use config::{CyclePolicy, Options, SearchPath};
pub use error::{Error, Location, Result};
pub use imputil::{package_name, FutureFeature, ImportRecord, Importer, Origin};

use codegen::{Arena, ModuleInfo, Pool, Writer};
use deps::Discovery;
use imputil::parse_future_features;
use owo_colors::OwoColorize;
use rustc_hash::FxHashSet;
use std::fs;
use std::path::{Path, PathBuf};
use stripmargin::StripMargin;

/// One compiler run: the search path, options and the modules already
/// compiled.
pub struct Session {
    search_path: SearchPath,
    options: Options,
    visited: FxHashSet<String>,
    written: Vec<PathBuf>,
}

impl Session {
    pub fn new(search_path: SearchPath, options: Options) -> Result<Self> {
        search_path.check()?;
        Ok(Session {
            search_path,
            options,
            visited: FxHashSet::default(),
            written: Vec::new(),
        })
    }

    pub fn search_path(&self) -> &SearchPath {
        &self.search_path
    }

    /// `module.go` files written so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Compiles the module `modname` found at `script` and returns the Go
    /// source of its package.
    pub fn compile(&mut self, script: &Path, modname: &str) -> Result<String> {
        self.compile_module(script, modname, self.options.write_cache)
    }

    /// Modules reached through recursion always land in their cache
    /// workspace, since nothing else receives their output.
    fn compile_module(&mut self, script: &Path, modname: &str, write_cache: bool) -> Result<String> {
        if modname.is_empty() {
            return Err(Error::Configuration(format!(
                "empty module name for {}",
                script.display()
            )));
        }
        self.visited.insert(modname.to_string());
        log::info!("{} {modname}", "compiling".green());
        let folders = ModuleFolders::new(script, modname);
        let source = source_file(script, &folders, modname)?;
        let src = fs::read_to_string(&source).map_err(Error::io(&source))?;
        let module = parser::parse(&src).map_err(|e| Error::syntax(modname, &src, &e))?;
        let future = parse_future_features(&module).map_err(|e| Error::codegen(modname, &src, e))?;

        let mut importer = Importer::new(&self.search_path, modname, script, future.absolute_import);
        let filename = script.to_string_lossy();
        let info = ModuleInfo {
            name: modname,
            filename: &filename,
            future,
        };
        let arena = Arena::new();
        let mut pool = Pool::new();
        let body = codegen::build_blocks(&arena, &module)
            .and_then(|root| codegen::generate(&module, root, &mut pool, &mut importer, &info))
            .map_err(|e| Error::codegen(modname, &src, e))?;

        let discovery = deps::discover(
            &source,
            script,
            modname,
            &self.search_path,
            future.absolute_import,
        )?;
        if self.options.recursive {
            for record in discovery.sources() {
                let name = record.name.trim_start_matches('.');
                if self.options.cycle_policy == CyclePolicy::Guard && self.visited.contains(name) {
                    log::debug!("{modname}: {name} already compiled");
                    continue;
                }
                if let Some(dep) = record.script() {
                    log::info!("{} {name} for {modname}", "recursing".cyan());
                    self.compile_module(dep, name, true)?;
                }
            }
        }

        let code = assemble(modname, &filename, &discovery, &pool, &body);
        if write_cache {
            let file = folders.write_module(&code)?;
            log::info!("{} {}", "wrote".green(), file.display());
            self.written.push(file);
            if self.search_path.push(folders.workspace.clone()) {
                log::debug!("search path += {}", folders.workspace.display());
            }
        }
        Ok(code)
    }
}

/// The file to read for a module: its script, or the copy kept in the cache
/// folder when the script is gone.
fn source_file(script: &Path, folders: &ModuleFolders, modname: &str) -> Result<PathBuf> {
    if script.exists() {
        return Ok(script.to_path_buf());
    }
    match folders.script_copy(script).filter(|p| p.exists()) {
        Some(copy) => {
            log::debug!("{modname}: reading cached copy {}", copy.display());
            Ok(copy)
        }
        None => Err(Error::Resolution {
            module: modname.to_string(),
            location: None,
            message: format!("cannot locate {}", script.display()),
        }),
    }
}

/// Wraps a generated module body in the package boilerplate.
fn assemble(
    modname: &str,
    filename: &str,
    discovery: &Discovery,
    pool: &Pool,
    body: &codegen::ModuleBody,
) -> String {
    let imports: String = discovery
        .deps
        .iter()
        .map(|name| format!("\t_ \"{}\"\n", package_name(name)))
        .collect();
    let package = modname.rsplit('.').next().unwrap_or(modname);
    let script = codegen::util::go_str(filename);
    let mut w = Writer::new();
    w.write_tmpl(
        &r#"
        |package $package
        |import (
        |	πg "pyruntime"
        |$imports
        |)
        |var Code *πg.Code
        |func init() {
        |	Code = πg.NewCode("<module>", $script, nil, 0, func(πF *πg.Frame, _ []*πg.Object) (*πg.Object, *πg.BaseException) {
        |		var πR *πg.Object
        |		_ = πR
        |		var πE *πg.BaseException
        |		_ = πE"#
            .strip_margin()
            .trim_start_matches('\n'),
        &[
            ("package", package),
            ("script", script.as_str()),
            ("imports", imports.trim_end_matches('\n')),
        ],
    );
    {
        let mut w = w.indent_block(2);
        pool.write_interns(&mut w);
        codegen::write_temps(&body.temps, &mut w);
        w.write(&body.code);
        w.write("return nil, πE");
    }
    let modname = codegen::util::go_str(modname);
    w.write_tmpl(
        &r#"
        |	})
        |	πg.RegisterModule($modname, Code)
        |}"#
        .strip_margin()
        .trim_start_matches('\n'),
        &[("modname", modname.as_str())],
    );
    w.into_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Workspace {
        dir: tempfile::TempDir,
    }

    impl Workspace {
        fn new(files: &[(&str, &str)]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            for (name, contents) in files {
                let path = dir.path().join(name);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, contents).unwrap();
            }
            fs::create_dir_all(dir.path().join("search/src/__python__/sys")).unwrap();
            Workspace { dir }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn session(&self, options: Options) -> Session {
            Session::new(SearchPath::new([self.path("search")]), options).unwrap()
        }
    }

    #[test]
    fn empty_search_path_is_rejected() {
        let e = Session::new(SearchPath::default(), Options::default()).err().unwrap();
        assert!(matches!(e, Error::Configuration(_)));
    }

    #[test]
    fn module_boilerplate() {
        let ws = Workspace::new(&[("m.py", "x = 'a'\ny = 'a'\n")]);
        let code = ws.session(Options::default()).compile(&ws.path("m.py"), "m").unwrap();
        assert!(code.starts_with("package m\nimport (\n\tπg \"pyruntime\"\n"));
        assert_eq!(code.matches("πg.InternStr(\"a\")").count(), 1);
        assert!(code.contains("\t\tßa := πg.InternStr(\"a\")\n"));
        assert_eq!(code.matches("ßa.ToObject())").count(), 2);
        assert!(code.contains("\t\treturn nil, πE\n\t})\n\tπg.RegisterModule(\"m\", Code)\n}\n"));
    }

    #[test]
    fn output_is_deterministic() {
        let src = "import sys\nd = {'b': 1, 'a': 2}\nfor k in d:\n    print(k)\n";
        let ws = Workspace::new(&[("m.py", src)]);
        let first = ws.session(Options::default()).compile(&ws.path("m.py"), "m").unwrap();
        let second = ws.session(Options::default()).compile(&ws.path("m.py"), "m").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn import_block_skips_ancestors() {
        let ws = Workspace::new(&[
            ("root/mypkg/__init__.py", ""),
            ("root/mypkg/main.py", "import sys\nimport mypkg\nimport mypkg.util\n"),
            ("root/mypkg/util.py", ""),
        ]);
        let options = Options {
            recursive: false,
            write_cache: false,
            cycle_policy: CyclePolicy::Guard,
        };
        let script = ws.path("root/mypkg/main.py");
        let code = ws.session(options).compile(&script, "mypkg.main").unwrap();
        assert!(code.starts_with("package main\n"));
        assert!(code.contains("\t_ \"__python__/mypkg/util\"\n\t_ \"__python__/sys\"\n)"));
        assert!(!code.contains("\"__python__/mypkg\""));
    }

    #[test]
    fn recursive_guard_terminates_on_cycles() {
        let ws = Workspace::new(&[("a.py", "import b\n"), ("b.py", "import a\n")]);
        let options = Options {
            recursive: true,
            write_cache: true,
            cycle_policy: CyclePolicy::Guard,
        };
        let mut session = ws.session(options);
        session.compile(&ws.path("a.py"), "a").unwrap();
        assert!(ws.path("__pycache__/a.pygoc/src/__python__/a/module.go").is_file());
        assert!(ws.path("__pycache__/b.pygoc/src/__python__/b/module.go").is_file());
        assert_eq!(session.written().len(), 2);
        assert_eq!(session.search_path().roots().len(), 3);
    }

    #[test]
    fn errors_name_the_module() {
        let ws = Workspace::new(&[("bad.py", "def f(:\n"), ("ret.py", "x = 1\nreturn x\n")]);
        let mut session = ws.session(Options::default());
        let e = session.compile(&ws.path("bad.py"), "bad").unwrap_err();
        assert!(e.to_string().starts_with("bad:1:"));
        let e = session.compile(&ws.path("ret.py"), "ret").unwrap_err();
        assert_eq!(e.to_string(), "ret:2:1: 'return' outside function");
    }

    #[test]
    fn missing_script_falls_back_to_cached_copy() {
        let ws = Workspace::new(&[("__pycache__/m.py", "import sys\nx = 'cached'\n")]);
        let code = ws
            .session(Options::default())
            .compile(&ws.path("m.py"), "m")
            .unwrap();
        assert!(code.contains("πg.InternStr(\"cached\")"));
        assert!(code.contains("\t_ \"__python__/sys\"\n)"));
    }

    #[test]
    fn missing_script_without_copy_is_unresolved() {
        let ws = Workspace::new(&[]);
        let e = ws
            .session(Options::default())
            .compile(&ws.path("missing.py"), "missing")
            .unwrap_err();
        assert!(matches!(e, Error::Resolution { location: None, .. }));
        assert!(e.to_string().starts_with("missing: cannot locate "));
    }

    #[test]
    fn recursion_writes_dependencies_without_cache_flag() {
        let ws = Workspace::new(&[("a.py", "import b\n"), ("b.py", "x = 1\n")]);
        let options = Options {
            recursive: true,
            write_cache: false,
            cycle_policy: CyclePolicy::Guard,
        };
        let mut session = ws.session(options);
        session.compile(&ws.path("a.py"), "a").unwrap();
        let b = ws.path("__pycache__/b.pygoc/src/__python__/b/module.go");
        assert_eq!(session.written(), [b.clone()]);
        assert!(!ws.path("__pycache__/a.pygoc").exists());
        assert!(fs::read_to_string(b).unwrap().starts_with("package b\n"));
        assert_eq!(session.search_path().roots().len(), 2);
    }

    #[test]
    fn self_import_is_not_a_dependency() {
        let ws = Workspace::new(&[("a.py", "import a\nimport sys\n")]);
        let code = ws.session(Options::default()).compile(&ws.path("a.py"), "a").unwrap();
        assert!(!code.contains("\"__python__/a\""));
        assert!(code.contains("\t_ \"__python__/sys\"\n)"));
    }
}
