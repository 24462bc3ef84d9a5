//! Lists the commands a template contains and the data they would miss.

use std::collections::HashSet;

use docx_rs::{
    read_docx, DocumentChild, Footer, FooterChild, Header, HeaderChild, Paragraph, StructuredDataTagChild, Table,
    TableCellContent, TableChild, TableRowChild,
};
use rapport_template::Delimiters;
use regex::Regex;
use serde_json::Value;

use crate::error::InspectError;

/// Paragraph texts of a document, gathered depth first.
#[derive(Default)]
struct Corpus {
    texts: Vec<String>,
}

impl Corpus {
    fn paragraph(&mut self, paragraph: &Paragraph) {
        self.texts.push(paragraph.raw_text());
    }

    fn body(&mut self, children: &[DocumentChild]) {
        for child in children {
            match child {
                DocumentChild::Paragraph(p) => self.paragraph(p),
                DocumentChild::Table(t) => self.table(t),
                DocumentChild::StructuredDataTag(sdt) => self.content_control(&sdt.children),
                _ => {}
            }
        }
    }

    fn table(&mut self, table: &Table) {
        for TableChild::TableRow(row) in &table.rows {
            for TableRowChild::TableCell(cell) in &row.cells {
                for content in &cell.children {
                    match content {
                        TableCellContent::Paragraph(p) => self.paragraph(p),
                        TableCellContent::Table(t) => self.table(t),
                        _ => {}
                    }
                }
            }
        }
    }

    fn content_control(&mut self, children: &[StructuredDataTagChild]) {
        for child in children {
            match child {
                StructuredDataTagChild::Paragraph(p) => self.paragraph(p),
                StructuredDataTagChild::Table(t) => self.table(t),
                StructuredDataTagChild::StructuredDataTag(sdt) => self.content_control(&sdt.children),
                _ => {}
            }
        }
    }

    fn header(&mut self, header: &Header) {
        for child in &header.children {
            match child {
                HeaderChild::Paragraph(p) => self.paragraph(p),
                HeaderChild::Table(t) => self.table(t),
                HeaderChild::StructuredDataTag(sdt) => self.content_control(&sdt.children),
            }
        }
    }

    fn footer(&mut self, footer: &Footer) {
        for child in &footer.children {
            match child {
                FooterChild::Paragraph(p) => self.paragraph(p),
                FooterChild::Table(t) => self.table(t),
                FooterChild::StructuredDataTag(sdt) => self.content_control(&sdt.children),
            }
        }
    }
}

fn command_pattern(delimiters: &Delimiters) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        "{}(.*?){}",
        regex::escape(&delimiters.open),
        regex::escape(&delimiters.close)
    ))
}

/// Distinct commands found in the body, headers and footers, in document order.
pub fn template_commands(template: &[u8], delimiters: &Delimiters) -> Result<Vec<String>, InspectError> {
    let doc = read_docx(template)?;

    let mut corpus = Corpus::default();
    corpus.body(&doc.document.children);
    let section = &doc.document.section_property;
    for (_, header) in section.get_headers() {
        corpus.header(&header);
    }
    for (_, footer) in section.get_footers() {
        corpus.footer(&footer);
    }

    let re = command_pattern(delimiters).map_err(|e| InspectError::Pattern(e.to_string()))?;
    let mut seen = HashSet::new();
    let mut commands = Vec::new();
    for text in &corpus.texts {
        for cap in re.captures_iter(text) {
            let command = cap[1].trim().to_string();
            if !command.is_empty() && seen.insert(command.clone()) {
                commands.push(command);
            }
        }
    }
    Ok(commands)
}

/// Data paths read by `commands` that have no value in `data`, without duplicates.
pub fn missing_data_paths(commands: &[String], data: &Value) -> Result<Vec<String>, InspectError> {
    let mut seen = HashSet::new();
    let mut missing = Vec::new();
    for command in commands {
        for path in rapport_template::missing_data_paths(command, data)? {
            if seen.insert(path.clone()) {
                missing.push(path);
            }
        }
    }
    Ok(missing)
}
