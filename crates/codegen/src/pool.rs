use crate::util::{convert_name, go_str};
use crate::writer::Writer;
use std::collections::BTreeSet;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoType {
    Object,
    Exception,
    Bool,
    Int,
    Dict,
    List,
    Set,
    Objects,
}

impl Display for GoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GoType::Object => "*πg.Object",
            GoType::Exception => "*πg.BaseException",
            GoType::Bool => "bool",
            GoType::Int => "int",
            GoType::Dict => "*πg.Dict",
            GoType::List => "*πg.List",
            GoType::Set => "*πg.Set",
            GoType::Objects => "[]*πg.Object",
        };
        write!(f, "{s}")
    }
}

pub type TempDecls = Vec<(String, GoType)>;

/// Per-module registry of interned strings and temporaries.
///
/// Temp names come from one counter for the whole module and are never
/// handed out twice. Declarations are grouped per generated function body:
/// `open_frame` starts a group and `close_frame` hands it back for emission
/// at the top of that body.
#[derive(Debug, Default)]
pub struct Pool {
    strings: BTreeSet<String>,
    frames: Vec<TempDecls>,
    temp_count: usize,
    label_count: usize,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a string literal and returns the handle every use site
    /// refers to.
    pub fn intern(&mut self, s: &str) -> String {
        if !self.strings.contains(s) {
            self.strings.insert(s.to_string());
        }
        intern_handle(s)
    }

    pub fn alloc_temp(&mut self, t: GoType) -> String {
        self.temp_count += 1;
        let name = format!("πTemp{:03}", self.temp_count);
        if self.frames.is_empty() {
            self.frames.push(Vec::new());
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.push((name.clone(), t));
        }
        name
    }

    pub fn open_frame(&mut self) {
        self.frames.push(Vec::new());
    }

    pub fn close_frame(&mut self) -> TempDecls {
        self.frames.pop().unwrap_or_default()
    }

    pub fn label(&mut self, prefix: &str) -> String {
        self.label_count += 1;
        format!("{prefix}{}", self.label_count)
    }

    /// Declares every interned string, sorted by value.
    pub fn write_interns(&self, w: &mut Writer) {
        for s in &self.strings {
            w.write(&format!("{} := πg.InternStr({})", intern_handle(s), go_str(s)));
        }
    }
}

pub fn intern_handle(s: &str) -> String {
    format!("ß{}", convert_name(s))
}

pub fn write_temps(decls: &[(String, GoType)], w: &mut Writer) {
    for (name, t) in decls {
        w.write(&format!("var {name} {t}\n_ = {name}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interns_once_and_sorted() {
        let mut pool = Pool::new();
        assert_eq!(pool.intern("b"), "ßb");
        assert_eq!(pool.intern("a b"), "ßunicode_61_20_62");
        assert_eq!(pool.intern("b"), "ßb");
        let mut w = Writer::new();
        pool.write_interns(&mut w);
        assert_eq!(
            w.as_str(),
            "ßunicode_61_20_62 := πg.InternStr(\"a b\")\nßb := πg.InternStr(\"b\")\n"
        );
    }

    #[test]
    fn temps_are_unique_across_frames() {
        let mut pool = Pool::new();
        pool.open_frame();
        let a = pool.alloc_temp(GoType::Object);
        pool.open_frame();
        let b = pool.alloc_temp(GoType::Bool);
        let inner = pool.close_frame();
        let c = pool.alloc_temp(GoType::Objects);
        let outer = pool.close_frame();
        assert_eq!([a.as_str(), b.as_str(), c.as_str()], ["πTemp001", "πTemp002", "πTemp003"]);
        assert_eq!(inner, vec![(b, GoType::Bool)]);
        assert_eq!(outer.len(), 2);
        let mut w = Writer::new();
        write_temps(&outer[1..], &mut w);
        assert_eq!(w.as_str(), "var πTemp003 []*πg.Object\n_ = πTemp003\n");
    }

    #[test]
    fn labels_count_up() {
        let mut pool = Pool::new();
        assert_eq!(pool.label("πLoop"), "πLoop1");
        assert_eq!(pool.label("πTry"), "πTry2");
    }
}
