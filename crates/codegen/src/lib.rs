mod block;
mod error;
mod expr;
mod pool;
mod stmt;
pub mod util;
mod writer;

pub use block::{build as build_blocks, Binding, Block, BlockKind};
pub use error::{Error, Result};
pub use pool::{intern_handle, write_temps, GoType, Pool, TempDecls};
pub use typed_arena::Arena;
pub use writer::{substitute, Indent, Writer};

use parser::{Alias, ImportNames, Module};
use stmt::{Frame, Visitor};

/// Compiler directives in effect for one module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FutureFeatures {
    pub absolute_import: bool,
    pub division: bool,
    pub print_function: bool,
    pub unicode_literals: bool,
    pub nested_scopes: bool,
    pub generators: bool,
    pub with_statement: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportBinding {
    /// Bind `name` to the module at `index` in the imported chain
    /// (`a`, `a.b`, `a.b.c` for `a.b.c`).
    Module { name: String, index: usize },
    /// Bind `name` to attribute `attr` of the last module in the chain.
    Member { name: String, attr: String },
    /// Copy every public member of the last module into the globals.
    Star,
}

/// One runtime import: the dotted module to load and what to bind from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub name: String,
    pub bindings: Vec<ImportBinding>,
}

impl Import {
    pub fn new(name: impl Into<String>) -> Self {
        Import {
            name: name.into(),
            bindings: Vec::new(),
        }
    }

    pub fn add_binding(&mut self, binding: ImportBinding) {
        self.bindings.push(binding)
    }
}

/// Turns import statements into runtime imports. Errors are human readable
/// messages; the caller attaches the location.
pub trait ImportResolver {
    fn import(&mut self, alias: &Alias<'_>) -> Result<Import, String>;

    fn import_from(
        &mut self,
        module: Option<&str>,
        level: usize,
        names: &ImportNames<'_>,
    ) -> Result<Vec<Import>, String>;
}

pub struct ModuleInfo<'i> {
    pub name: &'i str,
    pub filename: &'i str,
    pub future: FutureFeatures,
}

/// Generated statements of a module body plus the temporaries they need
/// declared ahead of them.
#[derive(Debug)]
pub struct ModuleBody {
    pub code: String,
    pub temps: TempDecls,
}

pub fn generate<'b>(
    module: &Module<'_>,
    root: &'b Block<'b>,
    pool: &mut Pool,
    resolver: &mut dyn ImportResolver,
    info: &ModuleInfo<'_>,
) -> Result<ModuleBody> {
    pool.open_frame();
    let mut visitor = Visitor::new(pool, resolver, root, info, vec![Frame::Function]);
    visitor.visit_stmts(&module.body)?;
    let code = visitor.finish();
    let temps = pool.close_frame();
    log::debug!("{}: {} temporaries", info.name, temps.len());
    Ok(ModuleBody { code, temps })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parser::Stmt;

    /// Binds every imported name as a module of the same name.
    pub(crate) struct FlatImports;

    impl ImportResolver for FlatImports {
        fn import(&mut self, alias: &Alias<'_>) -> Result<Import, String> {
            let mut import = Import::new(alias.name);
            let name = alias.asname.unwrap_or(alias.name);
            import.add_binding(ImportBinding::Module {
                name: name.split('.').next().unwrap_or(name).to_string(),
                index: 0,
            });
            Ok(import)
        }

        fn import_from(
            &mut self,
            module: Option<&str>,
            level: usize,
            names: &ImportNames<'_>,
        ) -> Result<Vec<Import>, String> {
            if level > 0 {
                return Err("relative import outside of a package".to_string());
            }
            let mut import = Import::new(module.unwrap_or_default());
            match names {
                ImportNames::Star => import.add_binding(ImportBinding::Star),
                ImportNames::List(aliases) => {
                    for a in aliases {
                        import.add_binding(ImportBinding::Member {
                            name: a.asname.unwrap_or(a.name).to_string(),
                            attr: a.name.to_string(),
                        });
                    }
                }
            }
            Ok(vec![import])
        }
    }

    pub(crate) fn try_lower(src: &str) -> Result<String> {
        let module = parser::parse(src).unwrap();
        let mut future = FutureFeatures::default();
        for (stmt, _) in &module.body {
            if let Stmt::ImportFrom {
                module: Some("__future__"),
                names: ImportNames::List(names),
                ..
            } = stmt
            {
                future.division |= names.iter().any(|a| a.name == "division");
            }
        }
        let arena = Arena::new();
        let root = build_blocks(&arena, &module)?;
        let mut pool = Pool::new();
        let info = ModuleInfo {
            name: "__main__",
            filename: "test.py",
            future,
        };
        generate(&module, root, &mut pool, &mut FlatImports, &info).map(|body| body.code)
    }

    pub(crate) fn lower(src: &str) -> String {
        try_lower(src).unwrap()
    }

    pub(crate) fn lower_err(src: &str) -> String {
        try_lower(src).unwrap_err().to_string()
    }
}
