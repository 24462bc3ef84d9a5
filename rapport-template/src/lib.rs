//! `.docx` templating engine driven by JSON data.
//!
//! Templates are ordinary Word documents whose text holds commands between a
//! delimiter pair (`{` and `}` by default):
//!
//! - `{patient.name}`, `{INS patient.name}` or `{= patient.name}` insert a value,
//! - `{FOR m IN measures}` ... `{END-FOR m}` repeat content per array element,
//!   with `{$m.value}` and `{$idx}` available inside,
//! - `{IF patient.gender == 'Masculin'}` ... `{END-IF}` keep content conditionally.
//!
//! A block whose markers sit in one paragraph repeats inline content, a block
//! inside one table row repeats the row, and any other block repeats the
//! paragraphs or rows from the opening marker to the closing one.
//!
//! ```no_run
//! use rapport_template::{create_report, ReportOptions};
//!
//! let template = std::fs::read("template.docx")?;
//! let data = serde_json::json!({ "patient": { "name": "Martin" } });
//! let report = create_report(&template, &data, &ReportOptions::default())?;
//! std::fs::write("rapport.docx", report)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod command;
mod expr;
mod render;
mod xml;

pub use command::{missing_data_paths, parse_command, Command, CommandError};
pub use expr::{parse_expr, Expr, Path};
pub use xml::Delimiters;

use std::io::{Cursor, Read, Write};

use rayon::prelude::*;
use serde_json::Value;
use tracing::debug;

/// Error type returned by [`create_report`].
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// An I/O error while reading or writing the archive.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The `.docx` template is malformed (bad zip archive, broken XML).
    #[error("invalid template: {0}")]
    InvalidTemplate(String),
    /// A content part is not UTF-8.
    #[error("invalid template: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    /// A command could not be parsed or evaluated.
    #[error("invalid command `{command}`: {reason}")]
    InvalidCommand {
        command: String,
        #[source]
        reason: CommandError,
    },
    /// Block commands are unbalanced or overlap.
    #[error("invalid template structure: {0}")]
    Structure(String),
    /// A sandbox limit was hit.
    #[error("sandbox limit exceeded: {0}")]
    LimitExceeded(String),
}

impl From<zip::result::ZipError> for TemplateError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => Self::Io(io),
            other => Self::InvalidTemplate(other.to_string()),
        }
    }
}

/// Resource limits applied when the sandbox is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Loop iterations allowed per part, summed over all loops.
    pub max_iterations: usize,
    /// Size a rendered part may reach.
    pub max_output_bytes: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_iterations: 100_000,
            max_output_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOptions {
    pub cmd_delimiter: Delimiters,
    /// Disables [`SandboxLimits`].
    pub no_sandbox: bool,
    pub limits: SandboxLimits,
    /// Turns `\n` in inserted text into Word line breaks.
    pub process_line_breaks: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            cmd_delimiter: Delimiters::default(),
            no_sandbox: false,
            limits: SandboxLimits::default(),
            process_line_breaks: true,
        }
    }
}

/// Whether an archive entry is a WordprocessingML part holding document text:
/// `word/document.xml`, headers, footers, footnotes and the like.
fn is_content_part(name: &str) -> bool {
    name.strip_prefix("word/")
        .is_some_and(|rest| !rest.contains('/') && rest.ends_with(".xml"))
}

struct Entry {
    name: String,
    is_dir: bool,
    contents: Vec<u8>,
}

/// Renders `template` against `data` and returns the bytes of the new `.docx`.
pub fn create_report(template: &[u8], data: &Value, options: &ReportOptions) -> Result<Vec<u8>, TemplateError> {
    let cursor = Cursor::new(template);
    let mut archive = zip::read::ZipArchive::new(cursor)?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        entries.push(Entry {
            name: file.name().to_string(),
            is_dir: file.is_dir(),
            contents,
        });
    }

    entries
        .par_iter_mut()
        .filter(|entry| !entry.is_dir && is_content_part(&entry.name))
        .try_for_each(|entry| -> Result<(), TemplateError> {
            let xml = String::from_utf8(std::mem::take(&mut entry.contents))?;
            let rendered = render::render_part(&xml, data, options)?;
            debug!(part = %entry.name, before = xml.len(), after = rendered.len(), "rendered part");
            entry.contents = rendered.into_bytes();
            Ok(())
        })?;

    let mut output_buf = Cursor::new(Vec::new());
    let mut zip_writer = zip::write::ZipWriter::new(&mut output_buf);
    let file_options = zip::write::SimpleFileOptions::default();

    for entry in &entries {
        if entry.is_dir {
            zip_writer.add_directory(entry.name.as_str(), file_options)?;
            continue;
        }
        zip_writer.start_file(entry.name.as_str(), file_options)?;
        zip_writer.write_all(&entry.contents)?;
    }

    zip_writer.finish()?;
    Ok(output_buf.into_inner())
}
