use std::ops::Range;
use std::path::PathBuf;

/// Source information for where a diagnostic came from
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub file_path: PathBuf,
    pub content: String,
}

/// A diagnostic message that can be either a warning or an error
#[derive(Debug, Clone)]
pub enum Diagnostic {
    Warning(Warning),
    Error(Error),
}

/// Warning messages that don't prevent config loading
#[derive(Debug, Clone)]
pub enum Warning {
    EmptyConfig {
        file_path: PathBuf,
    },
    /// The toggle entity is not a switch or a light; commands for the door
    /// will be ignored.
    UnsupportedToggleDomain {
        field_path: String,
        entity_id: String,
        span: Option<Range<usize>>,
        source: Option<SourceInfo>,
    },
}

/// Error messages that indicate problems with the config
#[derive(Debug, Clone)]
pub enum Error {
    Merge(MergeError),
    Validation(ValidationError),
}

/// Error type for merge conflicts
#[derive(Debug, Clone)]
pub struct MergeError {
    pub field_path: String,
    pub message: String,
    pub conflicts: Vec<MergeConflictLocation>,
}

#[derive(Debug, Clone)]
pub struct MergeConflictLocation {
    pub file_path: PathBuf,
    pub span: Range<usize>,
    pub content: String,
}

/// Error type for validation failures
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field_path: String,
    pub message: String,
    pub span: Option<Range<usize>>,
    pub source: Option<SourceInfo>,
}

/// Error type for config loading failures (parse errors, IO errors, etc.)
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read '{}': {error}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Failed to parse '{}': {error}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        error: toml::de::Error,
    },

    #[error("Import cycle detected at '{}': involves {} file(s)", path.display(), cycle.len())]
    ImportCycle { path: PathBuf, cycle: Vec<PathBuf> },
}

impl Diagnostic {
    /// Returns true if this diagnostic is an error
    pub fn is_error(&self) -> bool {
        matches!(self, Diagnostic::Error(_))
    }

    /// Returns true if this diagnostic is a warning
    pub fn is_warning(&self) -> bool {
        matches!(self, Diagnostic::Warning(_))
    }
}

/// Write a single-label report for `span` in `source`, or a plain line when
/// the location is unknown.
fn write_spanned(
    output: &mut Vec<u8>,
    kind: ariadne::ReportKind<'_>,
    title: &str,
    label: &str,
    span: Option<&Range<usize>>,
    source: Option<&SourceInfo>,
) {
    use ariadne::{Color, Label, Report, Source};

    let (Some(span), Some(source)) = (span, source) else {
        output.extend_from_slice(format!("{}\n", title).as_bytes());
        return;
    };

    let file_id = source.file_path.to_string_lossy().to_string();
    let color = match kind {
        ariadne::ReportKind::Error => Color::Red,
        _ => Color::Yellow,
    };
    Report::build(kind, (file_id.clone(), span.clone()))
        .with_message(title)
        .with_label(
            Label::new((file_id.clone(), span.clone()))
                .with_message(label)
                .with_color(color),
        )
        .finish()
        .write((file_id, Source::from(&source.content)), &mut *output)
        .ok();
}

/// Format all diagnostics for display using Ariadne
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    use ariadne::{Color, Label, Report, ReportKind, Source};

    let mut output = Vec::new();

    for diagnostic in diagnostics {
        match diagnostic {
            Diagnostic::Warning(warning) => match warning {
                Warning::EmptyConfig { file_path } => {
                    let warning_msg = format!(
                        "Warning: Config file '{}' is empty and has no effect\n",
                        file_path.display()
                    );
                    output.extend_from_slice(warning_msg.as_bytes());
                }
                Warning::UnsupportedToggleDomain {
                    field_path,
                    entity_id,
                    span,
                    source,
                } => {
                    write_spanned(
                        &mut output,
                        ReportKind::Warning,
                        &format!(
                            "Warning: '{}' in '{}' is not a switch or light; door commands will be ignored",
                            entity_id, field_path
                        ),
                        "unsupported toggle entity",
                        span.as_ref(),
                        source.as_ref(),
                    );
                }
            },
            Diagnostic::Error(error) => match error {
                Error::Merge(merge_error) => {
                    // Build a report with the first conflict's span
                    let first_conflict = &merge_error.conflicts[0];
                    let mut report = Report::build(
                        ReportKind::Error,
                        (
                            first_conflict.file_path.to_string_lossy().to_string(),
                            first_conflict.span.clone(),
                        ),
                    )
                    .with_message(format!("Merge conflict in field '{}'", merge_error.field_path))
                    .with_note(&merge_error.message);

                    // Add labels for each conflict location
                    for (idx, conflict) in merge_error.conflicts.iter().enumerate() {
                        let label_msg = if idx == 0 {
                            "first definition here"
                        } else {
                            "conflicts with this definition"
                        };

                        report = report.with_label(
                            Label::new((
                                conflict.file_path.to_string_lossy().to_string(),
                                conflict.span.clone(),
                            ))
                            .with_message(label_msg)
                            .with_color(if idx == 0 { Color::Red } else { Color::Yellow }),
                        );
                    }

                    // Finish the report and write it
                    let finished_report = report.finish();

                    // Write to each unique source file
                    let mut written_files = std::collections::HashSet::new();
                    for conflict in &merge_error.conflicts {
                        let file_id = conflict.file_path.to_string_lossy().to_string();
                        if written_files.insert(file_id.clone()) {
                            let source = Source::from(&conflict.content);
                            finished_report
                                .write((file_id, source), &mut output)
                                .ok();
                        }
                    }
                }
                Error::Validation(validation_error) => {
                    write_spanned(
                        &mut output,
                        ReportKind::Error,
                        &format!(
                            "Validation error in '{}': {}",
                            validation_error.field_path, validation_error.message
                        ),
                        &validation_error.message,
                        validation_error.span.as_ref(),
                        validation_error.source.as_ref(),
                    );
                }
            },
        }
    }

    String::from_utf8_lossy(&output).to_string()
}
