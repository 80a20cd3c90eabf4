use std::ops::{Deref, DerefMut};

/// Append-only text sink with tab indentation.
#[derive(Debug, Default)]
pub struct Writer {
    out: String,
    indent: usize,
}

/// Scoped indentation; the previous level comes back when this is dropped.
pub struct Indent<'w> {
    writer: &'w mut Writer,
    n: usize,
}

impl Deref for Indent<'_> {
    type Target = Writer;

    fn deref(&self) -> &Writer {
        self.writer
    }
}

impl DerefMut for Indent<'_> {
    fn deref_mut(&mut self) -> &mut Writer {
        self.writer
    }
}

impl Drop for Indent<'_> {
    fn drop(&mut self) {
        self.writer.indent -= self.n;
    }
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indent_block(&mut self, n: usize) -> Indent<'_> {
        self.indent += n;
        Indent { writer: self, n }
    }

    /// Writes each line of `text` at the current indentation.
    pub fn write(&mut self, text: &str) {
        for line in text.lines() {
            if !line.is_empty() {
                for _ in 0..self.indent {
                    self.out.push('\t');
                }
                self.out.push_str(line);
            }
            self.out.push('\n');
        }
    }

    pub fn write_label(&mut self, label: &str) {
        self.write(&format!("{label}:"))
    }

    pub fn write_tmpl(&mut self, template: &str, substitutions: &[(&str, &str)]) {
        self.write(&substitute(template, substitutions))
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn into_string(self) -> String {
        self.out
    }
}

/// Replaces `$name` placeholders. Placeholders without a substitution are
/// left as written.
pub fn substitute(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(i) = rest.find('$') {
        out.push_str(&rest[..i]);
        let tail = &rest[i + 1..];
        let len = tail
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(tail.len());
        let name = &tail[..len];
        match substitutions.iter().find(|(k, _)| *k == name) {
            Some((_, v)) if !name.is_empty() => out.push_str(v),
            _ => {
                out.push('$');
                out.push_str(name);
            }
        }
        rest = &tail[len..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indentation_is_scoped() {
        let mut w = Writer::new();
        w.write("a {");
        {
            let mut w = w.indent_block(1);
            w.write("b\n\nc");
            {
                let mut w = w.indent_block(2);
                w.write("d");
            }
            w.write("e");
        }
        w.write("}");
        assert_eq!(w.as_str(), "a {\n\tb\n\n\tc\n\t\t\td\n\te\n}\n");
    }

    #[test]
    fn early_exit_restores_indent() {
        fn emit(w: &mut Writer, fail: bool) -> Result<(), ()> {
            let mut w = w.indent_block(1);
            w.write("x");
            if fail {
                return Err(());
            }
            w.write("y");
            Ok(())
        }
        let mut w = Writer::new();
        assert!(emit(&mut w, true).is_err());
        w.write("z");
        assert_eq!(w.as_str(), "\tx\nz\n");
    }

    #[test]
    fn templates() {
        assert_eq!(
            substitute("package $package // $missing $", &[("package", "foo")]),
            "package foo // $missing $"
        );
        let mut w = Writer::new();
        w.write_tmpl("$a$b", &[("a", "1"), ("b", "2")]);
        assert_eq!(w.into_string(), "12\n");
    }
}
