use super::{Diagnostic, Severity};
use crate::ast::SourceMap;

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn paint(&self, code: &str, s: &str) -> String {
        if self.use_color { format!("\x1b[{code}m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold(&self, s: &str) -> String {
        self.paint("1", s)
    }

    fn cyan(&self, s: &str) -> String {
        self.paint("36", s)
    }

    fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }

    fn severity_color(&self, severity: Severity, s: &str) -> String {
        match severity {
            Severity::Error => self.paint("1;31", s),
            Severity::Warning => self.paint("1;33", s),
        }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        // "error[MC-C014]: message"
        let mut head = match d.severity {
            Severity::Error => "error".to_string(),
            Severity::Warning => "warning".to_string(),
        };
        if let Some(code) = d.code {
            head.push_str(&format!("[{code}]"));
        }
        out.push_str(&format!("{}: {}\n", self.severity_color(d.severity, &head), self.bold(&d.message)));

        let primary = d.labels.iter().find(|l| l.is_primary);
        if let (Some(label), Some(source)) = (primary, &d.source) {
            let map = SourceMap::new(source);
            let (line, col) = map.lookup(label.span.start);
            let text = map.line(line);

            out.push_str(&format!("  {} {}:{}\n", self.cyan("-->"), line, col));

            let gutter = line.to_string().len();
            let pipe = self.cyan("|");
            let pad = " ".repeat(gutter);
            out.push_str(&format!("{pad} {pipe}\n"));
            let number = self.cyan(&format!("{line:>gutter$}"));
            out.push_str(&format!("{number} {pipe} {text}\n"));

            // carets stop at the end of the line for multi-line spans
            let width = source
                .get(label.span.start..label.span.end)
                .map(|s| s.lines().next().unwrap_or("").chars().count())
                .unwrap_or(0)
                .max(1);
            let carets = self.severity_color(d.severity, &"^".repeat(width));
            let indent = " ".repeat(col.saturating_sub(1));
            if label.message.is_empty() {
                out.push_str(&format!("{pad} {pipe} {indent}{carets}\n"));
            } else {
                let msg = self.severity_color(d.severity, &label.message);
                out.push_str(&format!("{pad} {pipe} {indent}{carets} {msg}\n"));
            }
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {}\n", self.dim("="), note));
        }
        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} help: {}\n", self.dim("="), suggestion));
        }

        out
    }
}
