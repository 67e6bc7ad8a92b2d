//! Terminal output: query echo, the answer, sources and errors.
//!
//! Answers go to stdout, everything else to stderr. Styling is only applied
//! when the target stream is a terminal.

use crate::config::OutputFormat;
use crate::error::Error;
use crate::ingest::AttachmentKind;
use crate::models::ModelSelection;
use crate::protocol::{AnswerResult, Citation};
use crossterm::style::{Color, StyledContent, Stylize};
use markdown::{mdast, to_mdast, ParseOptions};
use std::io::{self, Write};
use std::path::Path;

type StyleFn = fn(StyledContent<&str>) -> StyledContent<&str>;

/// Applies ANSI styling, or passes text through untouched.
#[derive(Debug, Clone, Copy)]
struct Painter {
    enabled: bool,
}

impl Painter {
    fn paint(&self, text: &str, style: StyleFn) -> String {
        if self.enabled {
            style(text.stylize()).to_string()
        } else {
            text.to_string()
        }
    }

    fn color(&self, text: &str, color: Color) -> String {
        if self.enabled {
            text.stylize().with(color).bold().to_string()
        } else {
            text.to_string()
        }
    }
}

pub struct Renderer {
    format: OutputFormat,
    out: Painter,
    err: Painter,
}

impl Renderer {
    /// Style stdout and stderr only when they are terminals.
    pub fn for_terminal(format: OutputFormat) -> Self {
        Self::new(
            format,
            atty::is(atty::Stream::Stdout),
            atty::is(atty::Stream::Stderr),
        )
    }

    pub fn new(format: OutputFormat, styled_out: bool, styled_err: bool) -> Self {
        Self {
            format,
            out: Painter {
                enabled: styled_out,
            },
            err: Painter {
                enabled: styled_err,
            },
        }
    }

    /// Whether deltas should be written as they arrive.
    pub fn streams_live(&self) -> bool {
        self.format == OutputFormat::Plain
    }

    /// Echo the query (and attachment) before it is sent.
    pub fn echo_query<W: Write + ?Sized>(
        &self,
        out: &mut W,
        prompt: &str,
        attachment: Option<(&Path, AttachmentKind)>,
    ) -> io::Result<()> {
        writeln!(out)?;
        writeln!(out, "{}", self.err.paint("Query:", |s| s.cyan().bold()))?;
        writeln!(out, "  {}", prompt)?;
        if let Some((path, kind)) = attachment {
            let line = format!("Attached file: {} (type: {})", path.display(), kind.as_str());
            writeln!(out, "\n{}", self.err.paint(&line, |s| s.dim()))?;
        }
        writeln!(out)
    }

    /// Render the finished answer. `streamed` means the text was already
    /// written live, so only the trailing parts are printed.
    pub fn answer<W: Write + ?Sized>(
        &self,
        out: &mut W,
        answer: &AnswerResult,
        selection: ModelSelection,
        show_sources: bool,
        streamed: bool,
    ) -> io::Result<()> {
        match self.format {
            OutputFormat::Markdown => {
                let title = format!("Response from {}", selection.label);
                writeln!(out, "{}", self.out.color(&title, selection.color))?;
                writeln!(out)?;
                for line in markdown_lines(&answer.full_text, self.out) {
                    writeln!(out, "{}", line)?;
                }
            }
            OutputFormat::Plain => {
                if streamed {
                    writeln!(out)?;
                } else {
                    writeln!(out, "{}", answer.full_text.trim_end())?;
                }
            }
        }

        if show_sources && !answer.citations.is_empty() {
            self.sources(out, &answer.citations)?;
        }
        out.flush()
    }

    fn sources<W: Write + ?Sized>(&self, out: &mut W, citations: &[Citation]) -> io::Result<()> {
        writeln!(out)?;
        writeln!(out, "{}", self.out.paint("Sources", |s| s.bold()))?;
        for citation in citations {
            let index = format!("[{}]", citation.index);
            writeln!(
                out,
                "  {} {}",
                self.out.paint(&index, |s| s.dark_grey()),
                self.out.paint(&citation.url, |s| s.underlined())
            )?;
        }
        Ok(())
    }

    /// One clearly marked error line, plus a hint where there is one.
    pub fn error<W: Write + ?Sized>(&self, out: &mut W, error: &Error) -> io::Result<()> {
        writeln!(
            out,
            "{} {}",
            self.err.paint("Error:", |s| s.red().bold()),
            error
        )?;
        if let Some(hint) = error.hint() {
            writeln!(out, "{}", self.err.paint(hint, |s| s.dim()))?;
        }
        out.flush()
    }
}

/// Lay out markdown as terminal lines.
fn markdown_lines(text: &str, painter: Painter) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let normalized = text.replace('\t', "    ");
    let root = match to_mdast(&normalized, &ParseOptions::gfm()) {
        Ok(node) => node,
        Err(_) => return normalized.lines().map(str::to_string).collect(),
    };
    let nodes = match root {
        mdast::Node::Root(root) => root.children,
        other => vec![other],
    };

    let mut lines = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        lines.extend(block(node, painter, 0));
        if i + 1 < nodes.len() {
            lines.push(String::new());
        }
    }
    lines
}

fn block(node: &mdast::Node, painter: Painter, depth: usize) -> Vec<String> {
    match node {
        mdast::Node::Heading(heading) => {
            let text = inline(&heading.children, painter);
            let styled = match heading.depth {
                1 => painter.paint(&text, |s| s.bold().underlined()),
                _ => painter.paint(&text, |s| s.bold()),
            };
            vec![styled]
        }
        mdast::Node::Paragraph(paragraph) => inline(&paragraph.children, painter)
            .split('\n')
            .map(str::to_string)
            .collect(),
        mdast::Node::Code(code) => {
            let fence = format!("```{}", code.lang.clone().unwrap_or_default());
            let mut lines = vec![painter.paint(&fence, |s| s.dark_grey())];
            for line in code.value.split('\n') {
                lines.push(format!("  {}", painter.paint(line, |s| s.yellow())));
            }
            lines.push(painter.paint("```", |s| s.dark_grey()));
            lines
        }
        mdast::Node::List(list) => list_lines(list, painter, depth),
        mdast::Node::Blockquote(quote) => {
            let bar = painter.paint("│", |s| s.dark_grey());
            quote
                .children
                .iter()
                .flat_map(|child| block(child, painter, depth))
                .map(|line| format!("{} {}", bar, line))
                .collect()
        }
        mdast::Node::ThematicBreak(_) => vec![painter.paint(&"─".repeat(40), |s| s.dark_grey())],
        mdast::Node::Table(table) => table
            .children
            .iter()
            .enumerate()
            .flat_map(|(i, row)| {
                let cells: Vec<String> = children(row)
                    .iter()
                    .map(|cell| inline(children(cell), painter))
                    .collect();
                let line = cells.join(" │ ");
                if i == 0 {
                    vec![painter.paint(&line, |s| s.bold())]
                } else {
                    vec![line]
                }
            })
            .collect(),
        mdast::Node::Html(html) => vec![html.value.trim().to_string()],
        other => {
            let text = inline(std::slice::from_ref(other), painter);
            if text.is_empty() {
                Vec::new()
            } else {
                vec![text]
            }
        }
    }
}

fn list_lines(list: &mdast::List, painter: Painter, depth: usize) -> Vec<String> {
    let indent = "  ".repeat(depth);
    let start = list.start.unwrap_or(1);
    let mut lines = Vec::new();

    for (i, node) in list.children.iter().enumerate() {
        let mdast::Node::ListItem(item) = node else {
            continue;
        };
        let bullet = if list.ordered {
            format!("{}.", start + i as u32)
        } else {
            "•".to_string()
        };
        let bullet = painter.paint(&bullet, |s| s.cyan());

        let mut first = true;
        for child in &item.children {
            if let mdast::Node::List(nested) = child {
                lines.extend(list_lines(nested, painter, depth + 1));
                continue;
            }
            for line in block(child, painter, depth) {
                if first {
                    lines.push(format!("{}{} {}", indent, bullet, line));
                    first = false;
                } else {
                    lines.push(format!("{}  {}", indent, line));
                }
            }
        }
        if first {
            lines.push(format!("{}{}", indent, bullet));
        }
    }
    lines
}

fn inline(nodes: &[mdast::Node], painter: Painter) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            mdast::Node::Text(text) => out.push_str(&text.value),
            mdast::Node::Strong(strong) => {
                out.push_str(&painter.paint(&inline(&strong.children, painter), |s| s.bold()))
            }
            mdast::Node::Emphasis(emphasis) => {
                out.push_str(&painter.paint(&inline(&emphasis.children, painter), |s| s.italic()))
            }
            mdast::Node::Delete(delete) => out.push_str(&painter.paint(
                &inline(&delete.children, painter),
                |s| s.crossed_out(),
            )),
            mdast::Node::InlineCode(code) => {
                out.push_str(&painter.paint(&code.value, |s| s.yellow()))
            }
            mdast::Node::Link(link) => {
                let text = inline(&link.children, painter);
                out.push_str(&painter.paint(&text, |s| s.blue().underlined()));
                if text != link.url {
                    out.push_str(&painter.paint(&format!(" ({})", link.url), |s| s.dark_grey()));
                }
            }
            mdast::Node::Image(image) => out.push_str(if image.alt.is_empty() {
                &image.url
            } else {
                &image.alt
            }),
            mdast::Node::Break(_) => out.push('\n'),
            mdast::Node::Html(html) => out.push_str(&html.value),
            mdast::Node::InlineMath(math) => out.push_str(&math.value),
            other => out.push_str(&inline(children(other), painter)),
        }
    }
    out
}

fn children(node: &mdast::Node) -> &[mdast::Node] {
    node.children().map(Vec::as_slice).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::models::ModelFlag;

    fn answer(text: &str, citations: &[(usize, &str)]) -> AnswerResult {
        AnswerResult {
            full_text: text.to_string(),
            citations: citations
                .iter()
                .map(|&(index, url)| Citation {
                    index,
                    url: url.to_string(),
                })
                .collect(),
            model_used: "sonar".to_string(),
        }
    }

    fn render(renderer: &Renderer, answer: &AnswerResult, show_sources: bool) -> String {
        let mut out = Vec::new();
        renderer
            .answer(&mut out, answer, ModelFlag::Fast.selection(), show_sources, false)
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_markdown_header_and_body() {
        let renderer = Renderer::new(OutputFormat::Markdown, false, false);
        let output = render(
            &renderer,
            &answer("# Paris\n\nThe **capital** of France[1].\n\n- one\n- two", &[]),
            false,
        );
        assert!(output.starts_with("Response from Sonar\n\n"));
        assert!(output.contains("Paris\n"));
        assert!(output.contains("The capital of France[1]."));
        assert!(output.contains("• one\n• two"));
    }

    #[test]
    fn test_sources_hidden_by_default() {
        let renderer = Renderer::new(OutputFormat::Markdown, false, false);
        let result = answer("Paris[1].", &[(1, "https://a.example")]);
        assert!(!render(&renderer, &result, false).contains("https://a.example"));
        let shown = render(&renderer, &result, true);
        assert!(shown.contains("Sources\n  [1] https://a.example"));
    }

    #[test]
    fn test_plain_prints_text_verbatim() {
        let renderer = Renderer::new(OutputFormat::Plain, false, false);
        let output = render(&renderer, &answer("**not** parsed\n", &[]), false);
        assert_eq!(output, "**not** parsed\n");
    }

    #[test]
    fn test_plain_streamed_only_terminates_line() {
        let renderer = Renderer::new(OutputFormat::Plain, false, false);
        let mut out = Vec::new();
        renderer
            .answer(
                &mut out,
                &answer("already shown", &[]),
                ModelFlag::Pro.selection(),
                false,
                true,
            )
            .unwrap();
        assert_eq!(out, b"\n");
    }

    #[test]
    fn test_code_block_kept() {
        let lines = markdown_lines("```rust\nfn main() {}\n```", Painter { enabled: false });
        assert_eq!(lines, vec!["```rust", "  fn main() {}", "```"]);
    }

    #[test]
    fn test_styling_only_when_enabled() {
        let renderer = Renderer::new(OutputFormat::Markdown, true, false);
        let output = render(&renderer, &answer("hi", &[]), false);
        assert!(output.contains("\x1b["));
    }

    #[test]
    fn test_error_with_hint() {
        let renderer = Renderer::new(OutputFormat::Markdown, false, false);
        let mut out = Vec::new();
        renderer
            .error(&mut out, &Error::Provider(ProviderError::AuthMissing))
            .unwrap();
        let output = String::from_utf8(out).unwrap();
        assert!(output.starts_with("Error: PERPLEXITY_API_KEY is not set\n"));
        assert!(output.contains("export PERPLEXITY_API_KEY"));
    }

    #[test]
    fn test_query_echo() {
        let renderer = Renderer::new(OutputFormat::Markdown, false, false);
        let mut out = Vec::new();
        renderer
            .echo_query(
                &mut out,
                "Summarize this",
                Some((Path::new("document.pdf"), AttachmentKind::Pdf)),
            )
            .unwrap();
        let output = String::from_utf8(out).unwrap();
        assert!(output.contains("Query:\n  Summarize this\n"));
        assert!(output.contains("Attached file: document.pdf (type: pdf)"));
    }
}
