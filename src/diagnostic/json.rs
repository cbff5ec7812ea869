use super::{Diagnostic, Severity};
use crate::ast::SourceMap;

/// One diagnostic as a single-line JSON object.
pub fn render(d: &Diagnostic) -> String {
    let severity = match d.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };

    let source_map = d.source.as_deref().map(SourceMap::new);

    let labels: Vec<serde_json::Value> = d
        .labels
        .iter()
        .map(|l| {
            let mut obj = serde_json::json!({
                "start": l.span.start,
                "end": l.span.end,
                "message": l.message,
                "primary": l.is_primary,
            });
            if let Some(map) = &source_map {
                let (line, col) = map.lookup(l.span.start);
                obj["line"] = serde_json::Value::from(line);
                obj["col"] = serde_json::Value::from(col);
            }
            obj
        })
        .collect();

    let mut obj = serde_json::json!({
        "severity": severity,
        "message": d.message,
        "labels": labels,
        "notes": d.notes,
    });
    if let Some(code) = d.code {
        obj["code"] = serde_json::Value::String(code.to_string());
    }
    if let Some(s) = &d.suggestion {
        obj["suggestion"] = serde_json::Value::String(s.clone());
    }

    serde_json::to_string(&obj)
        .unwrap_or_else(|_| r#"{"severity":"error","message":"internal error serializing diagnostic"}"#.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    fn parse_json(s: &str) -> serde_json::Value {
        serde_json::from_str(s).expect("valid JSON")
    }

    #[test]
    fn render_basic_error() {
        let v = parse_json(&render(&Diagnostic::error("empty expression")));
        assert_eq!(v["severity"], "error");
        assert_eq!(v["message"], "empty expression");
        assert!(v["labels"].as_array().unwrap().is_empty());
        assert!(v.get("code").is_none());
        assert!(v.get("suggestion").is_none());
    }

    #[test]
    fn render_span_resolves_line_and_col() {
        let d = Diagnostic::error("unexpected input '@'")
            .with_code("MC-L001")
            .with_span(Span { start: 11, end: 12 }, "here")
            .with_source("int a;\nb = @;");
        let v = parse_json(&render(&d));
        assert_eq!(v["code"], "MC-L001");
        let label = &v["labels"][0];
        assert_eq!(label["start"], 11);
        assert_eq!(label["primary"], true);
        assert_eq!(label["line"], 2);
        assert_eq!(label["col"], 5);
    }

    #[test]
    fn render_label_without_source_has_no_position() {
        let d = Diagnostic::error("bad").with_span(Span { start: 5, end: 8 }, "here");
        let v = parse_json(&render(&d));
        assert!(v["labels"][0].get("line").is_none());
    }

    #[test]
    fn render_warning_with_notes_and_help() {
        let d = Diagnostic::warning("division by zero")
            .with_note("at bytecode offset 12 (DIV)")
            .with_suggestion("check the divisor first");
        let v = parse_json(&render(&d));
        assert_eq!(v["severity"], "warning");
        assert_eq!(v["notes"][0], "at bytecode offset 12 (DIV)");
        assert_eq!(v["suggestion"], "check the divisor first");
    }

    #[test]
    fn render_is_one_line() {
        let d = Diagnostic::error("multi\nline message").with_source("x\ny");
        assert!(!render(&d).contains('\n'));
    }
}
