//! Cleanup of extracted document text before segmentation.

use std::sync::LazyLock;

use regex::Regex;

/// Inline markdown image references: `![alt](target)` with an optional title.
static IMAGE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid image regex"));

static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid newline regex"));

/// Strips embedded images, collapses runs of three or more newlines to a
/// single blank line, and trims the result. Total: never fails.
pub fn normalize(raw: &str) -> String {
    let without_images = IMAGE_REF.replace_all(raw, "");
    let collapsed = collapse_blank_lines(&without_images);
    collapsed.trim().to_string()
}

/// Collapses `\n{3,}` to exactly `\n\n`, leaving everything else intact.
pub fn collapse_blank_lines(text: &str) -> String {
    EXCESS_NEWLINES.replace_all(text, "\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_long_newline_runs() {
        for k in 3..8 {
            let input = format!("a{}b", "\n".repeat(k));
            assert_eq!(normalize(&input), "a\n\nb", "k = {k}");
        }
    }

    #[test]
    fn test_keeps_single_blank_line() {
        assert_eq!(normalize("a\n\nb\nc"), "a\n\nb\nc");
    }

    #[test]
    fn test_strips_images() {
        let input = "Clause 1\n![img-0.jpeg](img-0.jpeg)\nClause 2 ![](data:image/png;base64,AAAA)";
        assert_eq!(normalize(input), "Clause 1\n\nClause 2");
    }

    #[test]
    fn test_image_removal_then_collapse() {
        let input = "top\n\n![logo](logo.png)\n\n\nbottom";
        assert_eq!(normalize(input), "top\n\nbottom");
    }

    #[test]
    fn test_trims_and_noop() {
        assert_eq!(normalize("  \n plain text \n\n"), "plain text");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("[link](x.md) stays"), "[link](x.md) stays");
    }
}
