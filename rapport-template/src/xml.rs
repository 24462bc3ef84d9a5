//! Raw WordprocessingML scanning.
//!
//! The engine never builds a DOM. It indexes element boundaries over the XML
//! text so block commands can be widened to whole paragraphs or rows, and it
//! rewrites `<w:t>` contents in place.

use crate::TemplateError;

/// Open/close delimiter pair enclosing a command in document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    pub open: String,
    pub close: String,
}

impl Delimiters {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    /// Finds the next delimited command at or after `from`, as a byte range
    /// covering both delimiters. An opening delimiter followed by another one
    /// before any closing delimiter is plain text.
    pub(crate) fn find(&self, text: &str, from: usize) -> Option<(usize, usize)> {
        if self.open.is_empty() || self.close.is_empty() {
            return None;
        }
        let mut open_at = from + text[from..].find(&self.open)?;
        loop {
            let inner_start = open_at + self.open.len();
            let close_at = inner_start + text[inner_start..].find(&self.close)?;
            match text[inner_start..close_at].rfind(&self.open) {
                Some(reopen) => open_at = inner_start + reopen,
                None => return Some((open_at, close_at + self.close.len())),
            }
        }
    }

    /// Strips the delimiters from a command found by [`Delimiters::find`].
    pub(crate) fn inner<'a>(&self, command: &'a str) -> &'a str {
        &command[self.open.len()..command.len() - self.close.len()]
    }
}

impl Default for Delimiters {
    fn default() -> Self {
        Self::new("{", "}")
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Element {
    pub(crate) name: String,
    /// Offset of the `<` opening the start tag.
    pub(crate) start: usize,
    /// Offset just past the start tag.
    pub(crate) open_end: usize,
    /// Offset of the end tag, equal to `end` for empty elements.
    pub(crate) close_start: usize,
    /// Offset just past the end tag.
    pub(crate) end: usize,
    pub(crate) parent: Option<usize>,
}

impl Element {
    pub(crate) fn is(&self, name: &str) -> bool {
        self.name == name
    }

    fn has_content(&self) -> bool {
        self.close_start > self.open_end
    }
}

/// Element boundaries of one XML part, in document order.
#[derive(Debug)]
pub(crate) struct ElementTree {
    pub(crate) elements: Vec<Element>,
}

impl ElementTree {
    pub(crate) fn parse(xml: &str) -> Result<Self, TemplateError> {
        let mut elements: Vec<Element> = Vec::new();
        let mut open: Vec<usize> = Vec::new();
        let mut pos = 0;

        while let Some(found) = xml[pos..].find('<') {
            let lt = pos + found;
            let rest = &xml[lt..];
            if rest.starts_with("<?") {
                pos = skip_past(xml, lt, "?>")?;
            } else if rest.starts_with("<!--") {
                pos = skip_past(xml, lt, "-->")?;
            } else if rest.starts_with("<![CDATA[") {
                pos = skip_past(xml, lt, "]]>")?;
            } else if rest.starts_with("<!") {
                pos = skip_past(xml, lt, ">")?;
            } else {
                let gt = tag_end(xml, lt)?;
                let tag = &xml[lt + 1..gt];
                if let Some(closing) = tag.strip_prefix('/') {
                    let name = closing.trim();
                    let idx = open
                        .pop()
                        .ok_or_else(|| malformed(format!("unexpected </{name}> at byte {lt}")))?;
                    if elements[idx].name != name {
                        return Err(malformed(format!(
                            "</{name}> at byte {lt} closes <{}>",
                            elements[idx].name
                        )));
                    }
                    elements[idx].close_start = lt;
                    elements[idx].end = gt + 1;
                } else {
                    let empty = tag.ends_with('/');
                    let name = tag
                        .split(|c: char| c.is_whitespace() || c == '/')
                        .next()
                        .unwrap_or_default()
                        .to_string();
                    if name.is_empty() {
                        return Err(malformed(format!("nameless tag at byte {lt}")));
                    }
                    let idx = elements.len();
                    elements.push(Element {
                        name,
                        start: lt,
                        open_end: gt + 1,
                        close_start: gt + 1,
                        end: gt + 1,
                        parent: open.last().copied(),
                    });
                    if !empty {
                        open.push(idx);
                    }
                }
                pos = gt + 1;
            }
        }

        if let Some(&idx) = open.last() {
            return Err(malformed(format!("<{}> is never closed", elements[idx].name)));
        }

        Ok(Self { elements })
    }

    /// Chain from the outermost element down to `idx` (inclusive).
    pub(crate) fn ancestors(&self, idx: usize) -> Vec<usize> {
        let mut chain = vec![idx];
        let mut current = self.elements[idx].parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.elements[parent].parent;
        }
        chain.reverse();
        chain
    }

    /// Innermost `<w:p>` holding element `idx`.
    pub(crate) fn paragraph_of(&self, idx: usize) -> Option<usize> {
        let mut current = self.elements[idx].parent;
        while let Some(parent) = current {
            if self.elements[parent].is("w:p") {
                return Some(parent);
            }
            current = self.elements[parent].parent;
        }
        None
    }

    /// Indices of `<w:t>` elements that hold text.
    pub(crate) fn text_elements(&self) -> impl Iterator<Item = usize> + '_ {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, el)| el.is("w:t") && el.has_content())
            .map(|(idx, _)| idx)
    }

    /// Content ranges of the `<w:t>` elements lying inside element `idx`.
    pub(crate) fn text_ranges_within(&self, idx: usize) -> Vec<(usize, usize)> {
        let outer = &self.elements[idx];
        self.text_elements()
            .map(|t| &self.elements[t])
            .filter(|t| t.start >= outer.start && t.end <= outer.end)
            .map(|t| (t.open_end, t.close_start))
            .collect()
    }
}

fn skip_past(xml: &str, from: usize, terminator: &str) -> Result<usize, TemplateError> {
    xml[from..]
        .find(terminator)
        .map(|pos| from + pos + terminator.len())
        .ok_or_else(|| malformed(format!("unterminated markup at byte {from}")))
}

/// Offset of the `>` closing the tag opened at `lt`, skipping quoted attribute values.
fn tag_end(xml: &str, lt: usize) -> Result<usize, TemplateError> {
    let mut quote: Option<u8> = None;
    for (i, &b) in xml.as_bytes()[lt..].iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Ok(lt + i),
            None => {}
        }
    }
    Err(malformed(format!("unterminated tag at byte {lt}")))
}

fn malformed(message: String) -> TemplateError {
    TemplateError::InvalidTemplate(format!("malformed XML: {message}"))
}

/// Moves every command that Word split over several `<w:t>` runs of one
/// paragraph into the run where it starts, leaving the tails of the other runs
/// empty.
pub(crate) fn merge_split_commands(xml: &str, tree: &ElementTree, delimiters: &Delimiters) -> String {
    let text_elements: Vec<usize> = tree.text_elements().collect();
    let text_spans: Vec<(usize, usize)> = text_elements
        .iter()
        .map(|&idx| (tree.elements[idx].open_end, tree.elements[idx].close_start))
        .collect();
    let paragraphs: Vec<Option<usize>> = text_elements.iter().map(|&idx| tree.paragraph_of(idx)).collect();

    if text_spans.is_empty() {
        return xml.to_string();
    }

    let concatenated: String = text_spans.iter().map(|&(s, e)| &xml[s..e]).collect();

    let mut offset_map: Vec<(usize, usize)> = Vec::with_capacity(concatenated.len());
    for (span_idx, &(s, e)) in text_spans.iter().enumerate() {
        for offset in 0..(e - s) {
            offset_map.push((span_idx, offset));
        }
    }

    let mut span_edits: Vec<Vec<(usize, usize, String)>> = vec![Vec::new(); text_spans.len()];
    let mut start = 0;
    while let Some((match_start, match_end)) = delimiters.find(&concatenated, start) {
        let (start_span, start_off) = offset_map[match_start];
        let (end_span, end_off) = offset_map[match_end - 1];

        if paragraphs[start_span] != paragraphs[end_span] {
            start = match_start + delimiters.open.len();
            continue;
        }
        if start_span != end_span {
            let command = &concatenated[match_start..match_end];
            let first_len = text_spans[start_span].1 - text_spans[start_span].0;
            span_edits[start_span].push((start_off, first_len, command.to_string()));
            for mid in (start_span + 1)..end_span {
                let mid_len = text_spans[mid].1 - text_spans[mid].0;
                span_edits[mid].push((0, mid_len, String::new()));
            }
            span_edits[end_span].push((0, end_off + 1, String::new()));
        }
        start = match_end;
    }

    let mut result = xml.to_string();
    for (span_idx, &(content_start, content_end)) in text_spans.iter().enumerate().rev() {
        let mut edits = std::mem::take(&mut span_edits[span_idx]);
        if edits.is_empty() {
            continue;
        }
        let mut span_text = result[content_start..content_end].to_string();
        edits.sort_by(|a, b| b.0.cmp(&a.0));
        for (from, to, replacement) in edits {
            span_text.replace_range(from..to, &replacement);
        }
        result.replace_range(content_start..content_end, &span_text);
    }

    result
}

/// Decodes the predefined entities and character references of XML text.
pub(crate) fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp..];
        let decoded = after.find(';').and_then(|semi| {
            let entity = &after[1..semi];
            let ch = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|ch| (ch, semi + 1))
        });
        match decoded {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &after[consumed..];
            }
            None => {
                out.push('&');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Escapes text for use as `<w:t>` content.
pub(crate) fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(xml: &str) -> String {
        let tree = ElementTree::parse(xml).unwrap();
        merge_split_commands(xml, &tree, &Delimiters::default())
    }

    #[test]
    fn parse_records_nesting_and_offsets() {
        let xml = r#"<?xml version="1.0"?><w:p><w:r><w:t xml:space="preserve">Hi</w:t></w:r><w:br/></w:p>"#;
        let tree = ElementTree::parse(xml).unwrap();
        let names: Vec<&str> = tree.elements.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["w:p", "w:r", "w:t", "w:br"]);

        let t = &tree.elements[2];
        assert_eq!(&xml[t.open_end..t.close_start], "Hi");
        assert_eq!(tree.ancestors(2), vec![0, 1, 2]);
        assert_eq!(tree.elements[3].parent, Some(0));
        assert_eq!(&xml[tree.elements[0].start..tree.elements[0].end], &xml[21..]);
    }

    #[test]
    fn parse_skips_gt_inside_attribute_values() {
        let xml = r#"<w:p w:hint="a>b"><w:t>x</w:t></w:p>"#;
        let tree = ElementTree::parse(xml).unwrap();
        assert_eq!(tree.elements.len(), 2);
        assert_eq!(tree.elements[1].parent, Some(0));
    }

    #[test]
    fn parse_rejects_mismatched_tags() {
        let err = ElementTree::parse("<w:p><w:r></w:p></w:r>").unwrap_err();
        assert!(matches!(err, TemplateError::InvalidTemplate(_)));
        assert!(ElementTree::parse("<w:p><w:r>").is_err());
    }

    #[test]
    fn table_tags_are_not_text_runs() {
        let xml = "<w:tbl><w:tr><w:tc><w:p><w:r><w:t>{a}</w:t></w:r></w:p></w:tc></w:tr></w:tbl>";
        let tree = ElementTree::parse(xml).unwrap();
        let texts: Vec<usize> = tree.text_elements().collect();
        assert_eq!(texts.len(), 1);
        assert!(tree.elements[texts[0]].is("w:t"));
    }

    #[test]
    fn merge_single_run_command_is_untouched() {
        let xml = r#"<w:t>{name}</w:t>"#;
        assert_eq!(merge(xml), xml);
    }

    #[test]
    fn merge_command_split_across_runs() {
        let xml = r#"<w:t>{Na</w:t><w:t>me}</w:t>"#;
        assert_eq!(merge(xml), r#"<w:t>{Name}</w:t><w:t></w:t>"#);
    }

    #[test]
    fn merge_keeps_surrounding_text() {
        let xml = r#"<w:t>Hello {pa</w:t><w:t>tient.</w:t><w:t>name} !</w:t>"#;
        assert_eq!(
            merge(xml),
            r#"<w:t>Hello {patient.name}</w:t><w:t></w:t><w:t> !</w:t>"#
        );
    }

    #[test]
    fn merge_handles_two_split_commands_sharing_a_run() {
        let xml = r#"<w:t>{a</w:t><w:t>} and {b</w:t><w:t>}</w:t>"#;
        assert_eq!(merge(xml), r#"<w:t>{a}</w:t><w:t> and {b}</w:t><w:t></w:t>"#);
    }

    #[test]
    fn merge_preserves_wt_attributes() {
        let xml = r#"<w:t xml:space="preserve">{ na</w:t><w:t xml:space="preserve">me }</w:t>"#;
        assert_eq!(
            merge(xml),
            r#"<w:t xml:space="preserve">{ name }</w:t><w:t xml:space="preserve"></w:t>"#
        );
    }

    #[test]
    fn merge_stays_within_a_paragraph() {
        let xml = r#"<w:p><w:r><w:t>taille {</w:t></w:r></w:p><w:p><w:r><w:t>12} {na</w:t></w:r><w:r><w:t>me}</w:t></w:r></w:p>"#;
        assert_eq!(
            merge(xml),
            r#"<w:p><w:r><w:t>taille {</w:t></w:r></w:p><w:p><w:r><w:t>12} {name}</w:t></w:r><w:r><w:t></w:t></w:r></w:p>"#
        );
    }

    #[test]
    fn find_skips_an_opening_delimiter_that_is_never_closed() {
        let delimiters = Delimiters::default();
        let text = "taille { 12 Nom: {name} et {age}";
        assert_eq!(delimiters.find(text, 0), Some((17, 23)));
        assert_eq!(delimiters.find(text, 23), Some((27, 32)));
        assert_eq!(delimiters.find("{ a { b", 0), None);

        let plus = Delimiters::new("+++", "+++");
        assert_eq!(plus.find("a +++name+++ b", 0), Some((2, 12)));
    }

    #[test]
    fn merge_without_text_runs_returns_unchanged() {
        let xml = r#"<w:p>plain paragraph</w:p>"#;
        assert_eq!(merge(xml), xml);
    }

    #[test]
    fn unescape_decodes_entities() {
        assert_eq!(unescape("a &amp;&amp; b"), "a && b");
        assert_eq!(unescape("&quot;x&quot; &lt; &#65;&#x42;"), "\"x\" < AB");
        assert_eq!(unescape("R&D"), "R&D");
    }

    #[test]
    fn escape_protects_markup() {
        assert_eq!(escape("a < b & c > d"), "a &lt; b &amp; c &gt; d");
    }
}
