//! Rendering of one XML part.
//!
//! Commands are located inside `<w:t>` text, block commands are widened to the
//! element range they govern, and the part is cut into literal XML and command
//! marks. The marks are nested into a tree that is evaluated against the data.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::trace;

use crate::command::{parse_command, Command, CommandError};
use crate::expr::{display, truthy, Expr, Frame};
use crate::xml::{escape, merge_split_commands, unescape, ElementTree};
use crate::{ReportOptions, TemplateError};

const LINE_BREAK: &str = r#"</w:t><w:br/><w:t xml:space="preserve">"#;

struct Located {
    start: usize,
    end: usize,
    text_element: usize,
    source: String,
    command: Command,
}

struct Block {
    open: usize,
    close: usize,
    depth: usize,
}

#[derive(Debug, Clone, Copy)]
enum Mark {
    Insert(usize),
    Open(usize),
    Close(usize),
}

/// Ordering among edits sharing an offset: closes, then cuts, then opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Close,
    Cut,
    Open,
}

struct Edit {
    at: usize,
    end: usize,
    mark: Option<Mark>,
    phase: Phase,
    rank: isize,
}

enum Segment {
    Xml(String),
    Mark(Mark),
}

enum Node<'c> {
    Xml(String),
    Insert(&'c Expr),
    For {
        located: &'c Located,
        var: &'c str,
        source: &'c Expr,
        body: Vec<Node<'c>>,
    },
    If {
        cond: &'c Expr,
        body: Vec<Node<'c>>,
    },
}

pub(crate) fn render_part(xml: &str, data: &Value, options: &ReportOptions) -> Result<String, TemplateError> {
    let delimiters = &options.cmd_delimiter;
    if delimiters.open.is_empty() || !xml.contains(delimiters.open.as_str()) {
        return Ok(xml.to_string());
    }

    let tree = ElementTree::parse(xml)?;
    let merged = merge_split_commands(xml, &tree, delimiters);
    let tree = ElementTree::parse(&merged)?;

    let commands = locate_commands(&merged, &tree, options)?;
    if commands.is_empty() {
        return Ok(merged);
    }
    trace!(commands = commands.len(), "rendering part");

    let blocks = pair_blocks(&commands)?;
    let edits = plan_edits(&merged, &tree, &commands, &blocks)?;
    let segments = cut(&merged, edits);
    let nodes = nest(segments, &commands, &blocks)?;

    let mut renderer = Renderer {
        data,
        options,
        frames: Vec::new(),
        iterations: 0,
    };
    let mut out = String::with_capacity(merged.len());
    renderer.render(&nodes, &mut out)?;
    Ok(out)
}

fn locate_commands(xml: &str, tree: &ElementTree, options: &ReportOptions) -> Result<Vec<Located>, TemplateError> {
    let delimiters = &options.cmd_delimiter;
    let mut commands = Vec::new();
    for idx in tree.text_elements() {
        let el = &tree.elements[idx];
        let content = &xml[el.open_end..el.close_start];
        let mut from = 0;
        while let Some((start, end)) = delimiters.find(content, from) {
            let source = unescape(delimiters.inner(&content[start..end]));
            let command = parse_command(&source)?;
            commands.push(Located {
                start: el.open_end + start,
                end: el.open_end + end,
                text_element: idx,
                source,
                command,
            });
            from = end;
        }
    }
    Ok(commands)
}

fn structure(message: String) -> TemplateError {
    TemplateError::Structure(message)
}

fn pair_blocks(commands: &[Located]) -> Result<Vec<Block>, TemplateError> {
    let mut blocks = Vec::new();
    let mut open: Vec<usize> = Vec::new();

    for (i, located) in commands.iter().enumerate() {
        let closes = match &located.command {
            Command::Insert(_) => continue,
            Command::For { .. } | Command::If(_) => {
                open.push(i);
                continue;
            }
            Command::EndFor { var } => {
                let opener = open.last().map(|&o| &commands[o].command);
                matches!(opener, Some(Command::For { var: v, .. }) if var.as_ref().map_or(true, |name| name == v))
            }
            Command::EndIf => matches!(open.last().map(|&o| &commands[o].command), Some(Command::If(_))),
        };
        match open.pop() {
            Some(o) if closes => blocks.push(Block {
                open: o,
                close: i,
                depth: open.len(),
            }),
            Some(o) => {
                return Err(structure(format!(
                    "`{}` does not close `{}`",
                    located.source, commands[o].source
                )))
            }
            None => return Err(structure(format!("`{}` has no opening command", located.source))),
        }
    }

    if let Some(&o) = open.last() {
        return Err(structure(format!("`{}` is never closed", commands[o].source)));
    }
    Ok(blocks)
}

/// Whether a paragraph or row holds nothing but block markers.
fn holds_only_markers(xml: &str, unit: usize, tree: &ElementTree, commands: &[Located]) -> bool {
    let el = &tree.elements[unit];
    let inside: Vec<&Located> = commands
        .iter()
        .filter(|c| c.start >= el.start && c.end <= el.end)
        .collect();
    if inside.iter().any(|c| !c.command.is_block_marker()) {
        return false;
    }
    tree.text_ranges_within(unit).into_iter().all(|(start, end)| {
        let mut pos = start;
        let mut blank = true;
        for c in inside.iter().filter(|c| c.start >= start && c.end <= end) {
            blank &= xml[pos..c.start].trim().is_empty();
            pos = c.end;
        }
        blank && xml[pos..end].trim().is_empty()
    })
}

fn removable(unit: usize, tree: &ElementTree) -> bool {
    let el = &tree.elements[unit];
    let parent_is_cell = el
        .parent
        .is_some_and(|p| tree.elements[p].is("w:tc"));
    el.is("w:tr") || (el.is("w:p") && !parent_is_cell)
}

/// How far a block's markers reach.
enum Extent {
    /// Both markers in one paragraph.
    Inline,
    /// Whole table row or sibling paragraphs and rows, from `open` to `close`.
    Units { open: usize, close: usize, same_row: bool },
}

fn extent(tree: &ElementTree, opener: &Located, closer: &Located) -> Result<Extent, TemplateError> {
    let open_chain = tree.ancestors(opener.text_element);
    let close_chain = tree.ancestors(closer.text_element);
    let shared = open_chain
        .iter()
        .zip(&close_chain)
        .take_while(|(x, y)| x == y)
        .count();
    if shared == 0 {
        return Err(structure(format!(
            "`{}` and `{}` share no enclosing element",
            opener.source, closer.source
        )));
    }

    if open_chain[..shared].iter().any(|&e| tree.elements[e].is("w:p")) {
        let shape = |chain: &[usize]| -> Vec<String> {
            chain.iter().map(|&e| tree.elements[e].name.clone()).collect()
        };
        if shape(&open_chain[shared..]) != shape(&close_chain[shared..]) {
            return Err(structure(format!(
                "`{}` and `{}` sit in differently shaped runs of one paragraph",
                opener.source, closer.source
            )));
        }
        return Ok(Extent::Inline);
    }

    let lca = open_chain[shared - 1];
    Ok(if tree.elements[lca].is("w:tr") {
        Extent::Units {
            open: lca,
            close: lca,
            same_row: true,
        }
    } else {
        Extent::Units {
            open: open_chain[shared],
            close: close_chain[shared],
            same_row: false,
        }
    })
}

fn plan_edits(xml: &str, tree: &ElementTree, commands: &[Located], blocks: &[Block]) -> Result<Vec<Edit>, TemplateError> {
    let mut edits = Vec::new();
    let mut removed_units = BTreeSet::new();

    for (i, located) in commands.iter().enumerate() {
        if !located.command.is_block_marker() {
            edits.push(Edit {
                at: located.start,
                end: located.end,
                mark: Some(Mark::Insert(i)),
                phase: Phase::Cut,
                rank: 0,
            });
        }
    }

    let extents = blocks
        .iter()
        .map(|block| extent(tree, &commands[block.open], &commands[block.close]))
        .collect::<Result<Vec<_>, _>>()?;

    // A unit ending one block and starting the next (`{END-IF}{IF b}`) stays
    // outside both of them.
    let closing_units: BTreeSet<usize> = extents
        .iter()
        .filter_map(|e| match e {
            Extent::Units { close, same_row: false, .. } => Some(*close),
            _ => None,
        })
        .collect();
    let hinges: BTreeSet<usize> = extents
        .iter()
        .filter_map(|e| match e {
            Extent::Units { open, same_row: false, .. } if closing_units.contains(open) => Some(*open),
            _ => None,
        })
        .collect();

    for (b, (block, reach)) in blocks.iter().zip(&extents).enumerate() {
        let opener = &commands[block.open];
        let closer = &commands[block.close];
        let depth = block.depth as isize;

        let (open_unit, close_unit, same_row) = match *reach {
            Extent::Inline => {
                edits.push(Edit {
                    at: opener.start,
                    end: opener.end,
                    mark: Some(Mark::Open(b)),
                    phase: Phase::Open,
                    rank: depth,
                });
                edits.push(Edit {
                    at: closer.start,
                    end: closer.end,
                    mark: Some(Mark::Close(b)),
                    phase: Phase::Close,
                    rank: -depth,
                });
                continue;
            }
            Extent::Units { open, close, same_row } => (open, close, same_row),
        };

        let open_at = if !same_row && hinges.contains(&open_unit) {
            tree.elements[open_unit].end
        } else {
            tree.elements[open_unit].start
        };
        let close_at = if !same_row && hinges.contains(&close_unit) {
            tree.elements[close_unit].start
        } else {
            tree.elements[close_unit].end
        };
        edits.push(Edit {
            at: open_at,
            end: open_at,
            mark: Some(Mark::Open(b)),
            phase: Phase::Open,
            rank: depth,
        });
        edits.push(Edit {
            at: close_at,
            end: close_at,
            mark: Some(Mark::Close(b)),
            phase: Phase::Close,
            rank: -depth,
        });

        for (marker, unit) in [(opener, open_unit), (closer, close_unit)] {
            if !same_row && removable(unit, tree) && holds_only_markers(xml, unit, tree, commands) {
                removed_units.insert((tree.elements[unit].start, tree.elements[unit].end));
            } else {
                edits.push(Edit {
                    at: marker.start,
                    end: marker.end,
                    mark: None,
                    phase: Phase::Cut,
                    rank: 0,
                });
            }
        }
    }

    edits.extend(removed_units.into_iter().map(|(at, end)| Edit {
        at,
        end,
        mark: None,
        phase: Phase::Cut,
        rank: 0,
    }));
    Ok(edits)
}

fn cut(xml: &str, mut edits: Vec<Edit>) -> Vec<Segment> {
    edits.sort_by_key(|e| (e.at, e.phase, e.rank));
    let mut segments = Vec::new();
    let mut cursor = 0;
    for edit in edits {
        if edit.at > cursor {
            segments.push(Segment::Xml(xml[cursor..edit.at].to_string()));
            cursor = edit.at;
        }
        if let Some(mark) = edit.mark {
            segments.push(Segment::Mark(mark));
        }
        cursor = cursor.max(edit.end);
    }
    if cursor < xml.len() {
        segments.push(Segment::Xml(xml[cursor..].to_string()));
    }
    segments
}

fn nest<'c>(segments: Vec<Segment>, commands: &'c [Located], blocks: &[Block]) -> Result<Vec<Node<'c>>, TemplateError> {
    let mut stack: Vec<(Option<usize>, Vec<Node<'c>>)> = vec![(None, Vec::new())];

    for segment in segments {
        match segment {
            Segment::Xml(xml) => push(&mut stack, Node::Xml(xml)),
            Segment::Mark(Mark::Insert(i)) => {
                if let Command::Insert(expr) = &commands[i].command {
                    push(&mut stack, Node::Insert(expr));
                }
            }
            Segment::Mark(Mark::Open(b)) => stack.push((Some(b), Vec::new())),
            Segment::Mark(Mark::Close(b)) => {
                let opener = &commands[blocks[b].open];
                let (open_block, body) = match stack.pop() {
                    Some(frame) if !stack.is_empty() => frame,
                    _ => return Err(structure(format!("`{}` closes outside of its block", opener.source))),
                };
                if open_block != Some(b) {
                    return Err(structure(format!(
                        "the block opened by `{}` overlaps another block",
                        opener.source
                    )));
                }
                let node = match &opener.command {
                    Command::For { var, source } => Node::For {
                        located: opener,
                        var,
                        source,
                        body,
                    },
                    Command::If(cond) => Node::If { cond, body },
                    _ => return Err(structure(format!("`{}` does not open a block", opener.source))),
                };
                push(&mut stack, node);
            }
        }
    }

    match stack.pop() {
        Some((None, nodes)) if stack.is_empty() => Ok(nodes),
        _ => Err(structure("unbalanced blocks".to_string())),
    }
}

fn push<'c>(stack: &mut [(Option<usize>, Vec<Node<'c>>)], node: Node<'c>) {
    if let Some((_, nodes)) = stack.last_mut() {
        nodes.push(node);
    }
}

struct Renderer<'a> {
    data: &'a Value,
    options: &'a ReportOptions,
    frames: Vec<Frame>,
    iterations: usize,
}

impl Renderer<'_> {
    fn render(&mut self, nodes: &[Node<'_>], out: &mut String) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Xml(xml) => out.push_str(xml),
                Node::Insert(expr) => {
                    let value = expr.evaluate(self.data, &self.frames);
                    self.insert_text(&display(&value), out);
                }
                Node::If { cond, body } => {
                    if truthy(&cond.evaluate(self.data, &self.frames)) {
                        self.render(body, out)?;
                    }
                }
                Node::For {
                    located,
                    var,
                    source,
                    body,
                } => {
                    let items = match source.evaluate(self.data, &self.frames) {
                        Value::Array(items) => items,
                        Value::Null => Vec::new(),
                        other => {
                            return Err(TemplateError::InvalidCommand {
                                command: located.source.clone(),
                                reason: CommandError::NotAList(other.to_string()),
                            })
                        }
                    };
                    for (index, value) in items.into_iter().enumerate() {
                        self.count_iteration()?;
                        self.frames.push(Frame {
                            var: var.to_string(),
                            value,
                            index,
                        });
                        let rendered = self.render(body, out);
                        self.frames.pop();
                        rendered?;
                    }
                }
            }
            self.check_size(out)?;
        }
        Ok(())
    }

    fn insert_text(&self, text: &str, out: &mut String) {
        let escaped = escape(text);
        if self.options.process_line_breaks && escaped.contains('\n') {
            let lines: Vec<&str> = escaped.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l)).collect();
            out.push_str(&lines.join(LINE_BREAK));
        } else {
            out.push_str(&escaped);
        }
    }

    fn count_iteration(&mut self) -> Result<(), TemplateError> {
        self.iterations += 1;
        if !self.options.no_sandbox && self.iterations > self.options.limits.max_iterations {
            return Err(TemplateError::LimitExceeded(format!(
                "more than {} loop iterations",
                self.options.limits.max_iterations
            )));
        }
        Ok(())
    }

    fn check_size(&self, out: &str) -> Result<(), TemplateError> {
        if !self.options.no_sandbox && out.len() > self.options.limits.max_output_bytes {
            return Err(TemplateError::LimitExceeded(format!(
                "rendered part exceeds {} bytes",
                self.options.limits.max_output_bytes
            )));
        }
        Ok(())
    }
}
