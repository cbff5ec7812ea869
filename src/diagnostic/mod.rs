pub mod ansi;
pub mod json;

use crate::ast::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Diagnostic {
            severity,
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic::new(Severity::Warning, message)
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: true });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// ---- From impls for the crate's error types ----

impl From<&crate::lexer::LexError> for Diagnostic {
    fn from(e: &crate::lexer::LexError) -> Self {
        Diagnostic::error(format!("unexpected input '{}'", e.snippet))
            .with_code("MC-L001")
            .with_span(e.span, "here")
            .with_suggestion(e.suggestion.clone())
    }
}

impl From<&crate::parser::ParseError> for Diagnostic {
    fn from(e: &crate::parser::ParseError) -> Self {
        Diagnostic::error(&e.message).with_code(e.code).with_span(e.span, "here")
    }
}

impl From<&crate::emitter::CompileError> for Diagnostic {
    fn from(e: &crate::emitter::CompileError) -> Self {
        let mut d = Diagnostic::error(e.to_string()).with_code(e.code());
        if let Some(hint) = e.hint() {
            d = d.with_suggestion(hint);
        }
        d
    }
}

impl From<&crate::compiler::LocatedError> for Diagnostic {
    fn from(e: &crate::compiler::LocatedError) -> Self {
        let d = Diagnostic::from(&e.error);
        if e.span == Span::UNKNOWN {
            d
        } else {
            d.with_span(e.span, "in this statement")
        }
    }
}

impl From<&crate::interpreter::RuntimeError> for Diagnostic {
    fn from(e: &crate::interpreter::RuntimeError) -> Self {
        Diagnostic::error(&e.message)
    }
}

impl From<&crate::vm::VmError> for Diagnostic {
    fn from(e: &crate::vm::VmError) -> Self {
        let d = Diagnostic::error(e.to_string()).with_code(e.code());
        match e {
            crate::vm::VmError::Decode(inner) => d.with_note(format!("bytecode offset {}", inner.offset())),
            _ => d,
        }
    }
}

/// Runtime faults point into the instruction stream, not the source.
impl From<&crate::vm::Fault> for Diagnostic {
    fn from(f: &crate::vm::Fault) -> Self {
        let mut d = Diagnostic::warning(f.kind.to_string())
            .with_code(f.kind.code())
            .with_note(format!("at bytecode offset {} ({})", f.offset, crate::bytecode::opcode_name(f.opcode)));
        if !f.stack.is_empty() {
            let values: Vec<String> = f.stack.iter().map(|v| format!("{:?}", v)).collect();
            d = d.with_note(format!("stack top: [{}]", values.join(", ")));
        }
        d
    }
}
