use assert_cmd::prelude::{CommandCargoExt, OutputAssertExt};
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn workspace(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        let path = dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
    fs::create_dir_all(dir.path().join("go/src/__python__/sys")).unwrap();
    dir
}

fn pygoc(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME")).unwrap();
    cmd.current_dir(dir).env("PYGOC_PATH", dir.join("go"));
    cmd
}

fn compile(dir: &Path, script: &str, args: &[&str]) -> String {
    let output = pygoc(dir).arg(script).args(args).assert().success();
    String::from_utf8(output.get_output().stdout.clone()).unwrap()
}

fn test_fail(dir: &Path, script: &str, stderr: &str) {
    let output = pygoc(dir).arg(script).assert().code(1);
    let err = String::from_utf8(output.get_output().stderr.clone()).unwrap();
    assert!(err.contains(stderr), "{err}");
}

#[test]
fn native_and_source_imports() {
    let dir = workspace(&[
        ("mypkg/__init__.py", ""),
        ("mypkg/main.py", "import sys\nimport mypkg\nimport mypkg.util\n"),
        ("mypkg/util.py", "x = 1\n"),
    ]);
    let code = compile(dir.path(), "mypkg/main.py", &["-m", "mypkg.main"]);
    assert!(code.starts_with("package main\n"));
    assert!(code.contains("\t_ \"__python__/mypkg/util\"\n\t_ \"__python__/sys\"\n)"));
    assert!(!code.contains("\"__python__/mypkg\""));
    assert!(code.contains("πg.RegisterModule(\"mypkg.main\", Code)"));
}

#[test]
fn repeated_string_is_interned_once() {
    let dir = workspace(&[("strings.py", "x = \"a\"; y = \"a\"\n")]);
    let code = compile(dir.path(), "strings.py", &[]);
    assert_eq!(code.matches("πg.InternStr(\"a\")").count(), 1);
    assert_eq!(code.matches("ßa.ToObject())").count(), 2);
}

#[test]
fn for_else_runs_without_break() {
    let dir = workspace(&[("loop.py", "for i in range(3):\n    pass\nelse:\n    flag = 1\n")]);
    let code = compile(dir.path(), "loop.py", &[]);
    let sentinel = code
        .lines()
        .find_map(|l| l.trim().strip_suffix(" = true"))
        .unwrap()
        .to_string();
    assert!(code.contains(&format!("if {sentinel} {{")));
    assert!(!code.contains(&format!("{sentinel} = false")));
    assert!(code.contains("ßflag.ToObject(), πg.NewInt(1).ToObject()"));
}

#[test]
fn output_file_and_determinism() {
    let dir = workspace(&[("m.py", "import sys\nd = {'b': [1, 2], 'a': (3,)}\n")]);
    let first = compile(dir.path(), "m.py", &[]);
    compile(dir.path(), "m.py", &["-o", "m.go"]);
    assert_eq!(fs::read_to_string(dir.path().join("m.go")).unwrap(), first);
}

#[test]
fn recursive_cache_handles_cycles() {
    let dir = workspace(&[("a.py", "import b\n"), ("b.py", "import a\nx = 1\n")]);
    compile(dir.path(), "a.py", &["-r", "--cache", "-v"]);
    let cache = dir.path().join("__pycache__");
    assert!(cache.join("a.pygoc/src/__python__/a/module.go").is_file());
    let b = fs::read_to_string(cache.join("b.pygoc/src/__python__/b/module.go")).unwrap();
    assert!(b.starts_with("package b\n"));
}

#[test]
fn recursion_always_writes_dependencies() {
    let dir = workspace(&[("a.py", "import b\n"), ("b.py", "x = 1\n")]);
    let code = compile(dir.path(), "a.py", &["-r"]);
    assert!(code.starts_with("package a\n"));
    let cache = dir.path().join("__pycache__");
    assert!(cache.join("b.pygoc/src/__python__/b/module.go").is_file());
    assert!(!cache.join("a.pygoc").exists());
}

#[test]
fn fail_native_plain_import() {
    let dir = workspace(&[("n.py", "import __go__.fmt\n")]);
    test_fail(dir.path(), "n.py", "use \"from __go__.xyz import ...\" syntax");
}

#[test]
fn fail_syntax_error() {
    let dir = workspace(&[("bad.py", "def f(:\n    pass\n")]);
    test_fail(dir.path(), "bad.py", "bad.py");
}

#[test]
fn fail_return_outside_function() {
    let dir = workspace(&[("ret.py", "x = 1\nreturn x\n")]);
    test_fail(dir.path(), "ret.py", "ret:2:1: 'return' outside function");
}

#[test]
fn fail_unresolved_import() {
    let dir = workspace(&[("imp.py", "import nowhere\n")]);
    test_fail(dir.path(), "imp.py", "imp:1:1: no module named 'nowhere'");
}

#[test]
fn fail_unsupported_feature() {
    let dir = workspace(&[("gen.py", "def g():\n    yield 1\n")]);
    test_fail(dir.path(), "gen.py", "generators is not supported");
}

#[test]
fn fail_without_search_path() {
    let dir = workspace(&[("m.py", "x = 1\n")]);
    let output = Command::cargo_bin(env!("CARGO_PKG_NAME"))
        .unwrap()
        .current_dir(dir.path())
        .env_remove("PYGOC_PATH")
        .arg("m.py")
        .assert()
        .code(1);
    let err = String::from_utf8(output.get_output().stderr.clone()).unwrap();
    assert!(err.contains("configuration error"), "{err}");
}
