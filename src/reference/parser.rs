//! Line-oriented parser for statute documents converted to markdown.
//!
//! Recognised headings (case-insensitive, one to six leading `#`):
//!
//! ```text
//! # BAB IV                 chapter, roman numeral
//! ## KESEMPATAN KERJA      chapter title (next non-blank line, exactly two #)
//! ### Bagian Kesatu        section
//! #### Paragraf 2          sub-section
//! ### Pasal 5A             article
//! ```
//!
//! Each article becomes one [`ParsedArticle`] carrying the chapter, section and
//! sub-section in force when it was opened. The article heading line is the
//! first line of its content.
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ReferenceError;

/// Heading keywords of the reference document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingMarkers {
    pub chapter: String,
    pub section: String,
    pub subsection: String,
    pub article: String,
}

impl Default for HeadingMarkers {
    fn default() -> Self {
        Self {
            chapter: "BAB".to_string(),
            section: "Bagian".to_string(),
            subsection: "Paragraf".to_string(),
            article: "Pasal".to_string(),
        }
    }
}

impl HeadingMarkers {
    pub fn english() -> Self {
        Self {
            chapter: "Chapter".to_string(),
            section: "Section".to_string(),
            subsection: "Subsection".to_string(),
            article: "Article".to_string(),
        }
    }

    /// Pattern for in-text references such as `Pasal 59` or `Pasal 156A`.
    pub fn article_reference_pattern(&self) -> Result<Regex, regex::Error> {
        Regex::new(&format!(
            r"(?i)\b{}\s+(\d+[A-Z]?)\b",
            regex::escape(&self.article)
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArticle {
    pub chapter_numeral: Option<String>,
    pub chapter_title: Option<String>,
    pub section_title: Option<String>,
    pub subsection_number: Option<String>,
    pub article_number: String,
    pub content: String,
}

struct HeadingPatterns {
    chapter: Regex,
    chapter_title: Regex,
    section: Regex,
    subsection: Regex,
    article: Regex,
}

impl HeadingPatterns {
    fn compile(markers: &HeadingMarkers) -> Result<Self, regex::Error> {
        let heading = |keyword: &str, tail: &str| {
            Regex::new(&format!(
                r"(?i)^#{{1,6}}\s*{}\s+{}",
                regex::escape(keyword),
                tail
            ))
        };
        Ok(Self {
            chapter: heading(&markers.chapter, r"([IVXLCDM]+)\b")?,
            chapter_title: Regex::new(r"^##\s*([^#\s].*)$")?,
            section: heading(&markers.section, r"(.+)$")?,
            subsection: heading(&markers.subsection, r"(\d+)\b")?,
            article: heading(&markers.article, r"(\d+[A-Z]?)\b")?,
        })
    }
}

#[derive(Default)]
struct Context {
    chapter_numeral: Option<String>,
    chapter_title: Option<String>,
    section_title: Option<String>,
    subsection_number: Option<String>,
}

struct OpenArticle {
    number: String,
    lines: Vec<String>,
}

fn flush(open: &mut Option<OpenArticle>, ctx: &Context, out: &mut Vec<ParsedArticle>) {
    let Some(article) = open.take() else {
        return;
    };
    let content = article.lines.join("\n").trim().to_string();
    if content.is_empty() {
        return;
    }
    out.push(ParsedArticle {
        chapter_numeral: ctx.chapter_numeral.clone(),
        chapter_title: ctx.chapter_title.clone(),
        section_title: ctx.section_title.clone(),
        subsection_number: ctx.subsection_number.clone(),
        article_number: article.number,
        content,
    });
}

/// Single pass over `text`, emitting articles in document order.
pub fn parse_reference_document(
    text: &str,
    markers: &HeadingMarkers,
) -> Result<Vec<ParsedArticle>, ReferenceError> {
    let patterns = HeadingPatterns::compile(markers)?;
    let lines: Vec<&str> = text.lines().map(str::trim).collect();

    let mut articles = Vec::new();
    let mut ctx = Context::default();
    let mut open: Option<OpenArticle> = None;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];

        if let Some(caps) = patterns.chapter.captures(line) {
            flush(&mut open, &ctx, &mut articles);
            ctx.chapter_numeral = Some(caps[1].to_uppercase());
            ctx.chapter_title = None;
            ctx.section_title = None;
            ctx.subsection_number = None;

            let next = (i + 1..lines.len()).find(|&j| !lines[j].is_empty());
            if let Some(j) = next {
                if let Some(title) = patterns.chapter_title.captures(lines[j]) {
                    ctx.chapter_title = Some(title[1].trim().to_string());
                    i = j;
                }
            }
        } else if let Some(caps) = patterns.section.captures(line) {
            flush(&mut open, &ctx, &mut articles);
            ctx.section_title = Some(caps[1].trim().to_string());
            ctx.subsection_number = None;
        } else if let Some(caps) = patterns.subsection.captures(line) {
            flush(&mut open, &ctx, &mut articles);
            ctx.subsection_number = Some(caps[1].to_string());
        } else if let Some(caps) = patterns.article.captures(line) {
            flush(&mut open, &ctx, &mut articles);
            open = Some(OpenArticle {
                number: caps[1].to_uppercase(),
                lines: vec![line.to_string()],
            });
        } else if let Some(article) = open.as_mut() {
            article.lines.push(line.to_string());
        }

        i += 1;
    }

    flush(&mut open, &ctx, &mut articles);
    Ok(articles)
}
