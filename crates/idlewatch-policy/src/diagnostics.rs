use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A configuration problem that was recovered locally by skipping or defaulting.
pub struct ConfigDiagnostic {
    pub field: String,
    pub severity: DiagnosticSeverity,
    pub message: String,
}

impl ConfigDiagnostic {
    pub fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            severity: DiagnosticSeverity::Warning,
            message: message.into(),
        }
    }

    pub fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            severity: DiagnosticSeverity::Error,
            message: message.into(),
        }
    }
}

/// Emits each diagnostic at its severity. Nothing here is fatal.
pub fn log_config_diagnostics(diagnostics: &[ConfigDiagnostic]) {
    for diagnostic in diagnostics {
        match diagnostic.severity {
            DiagnosticSeverity::Warning => {
                warn!(field = %diagnostic.field, "config entry ignored: {}", diagnostic.message)
            }
            DiagnosticSeverity::Error => {
                error!(field = %diagnostic.field, "config value replaced with default: {}", diagnostic.message)
            }
        }
    }
}
