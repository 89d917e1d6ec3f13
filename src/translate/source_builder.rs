//! Indented text buffer for generated declaration and definition units.

#[derive(Debug, Default)]
pub struct SourceBuilder {
    output: String,
    /// Current indentation level
    indent: usize,
}

const INDENT: &str = "  ";

impl SourceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line at the current indentation.
    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            self.output.push_str(&self.pad());
            self.output.push_str(text);
        }
        self.output.push('\n');
    }

    pub fn blank(&mut self) {
        if !self.output.is_empty() && !self.output.ends_with("\n\n") {
            self.output.push('\n');
        }
    }

    /// Append text verbatim, without indentation.
    pub fn raw(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// Line followed by an indented region, e.g. `if (x) {`.
    pub fn open(&mut self, text: impl AsRef<str>) {
        self.line(text);
        self.indent += 1;
    }

    /// Close an indented region with `text`, e.g. `}`.
    pub fn close(&mut self, text: impl AsRef<str>) {
        self.indent = self.indent.saturating_sub(1);
        self.line(text);
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    fn pad(&self) -> String {
        INDENT.repeat(self.indent)
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }

    pub fn finish(self) -> String {
        self.output
    }
}

/// Escape a string for an Objective-C string literal.
pub fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\0' => result.push_str("\\0"),
            c if c.is_ascii_graphic() || c == ' ' => result.push(c),
            c if (c as u32) <= 0xffff => result.push_str(&format!("\\u{:04x}", c as u32)),
            c => result.push_str(&format!("\\U{:08x}", c as u32)),
        }
    }
    result
}

/// `com/example/Foo.h` -> `COM_EXAMPLE_FOO_H`
pub fn include_guard(path: &str) -> String {
    let mut guard: String = path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    if guard.starts_with(|c: char| c.is_ascii_digit()) {
        guard.insert(0, '_');
    }
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_regions_indent() {
        let mut out = SourceBuilder::new();
        out.open("if (x) {");
        out.line("y();");
        out.line("");
        out.close("}");
        assert_eq!(out.finish(), "if (x) {\n  y();\n\n}\n");
    }

    #[test]
    fn test_blank_lines_do_not_stack() {
        let mut out = SourceBuilder::new();
        out.blank();
        out.line("a");
        out.blank();
        out.blank();
        out.line("b");
        assert_eq!(out.finish(), "a\n\nb\n");
    }

    #[test]
    fn test_escape_string() {
        assert_eq!(escape_string("a\"b\\c\n"), "a\\\"b\\\\c\\n");
        assert_eq!(escape_string("π"), "\\u03c0");
    }

    #[test]
    fn test_include_guard() {
        assert_eq!(include_guard("com/example/Foo.h"), "COM_EXAMPLE_FOO_H");
    }
}
