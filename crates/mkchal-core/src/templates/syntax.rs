//! Lexical scanner for placeholder markers.
//!
//! The scanner never interprets template content: it only looks for the two marker
//! bytes and splits the input into literal text, escaped markers and named slots.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{MkchalError, Result};
use crate::templates::TemplateId;

/// The pair of markers that delimit a placeholder.
///
/// Both markers must be distinct ASCII punctuation so that a doubled marker is an
/// unambiguous escape and a slot name can never contain one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerSyntax {
    pub open: char,
    pub close: char,
}

impl Default for MarkerSyntax {
    fn default() -> Self {
        Self {
            open: '{',
            close: '}',
        }
    }
}

/// One piece of a scanned template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    /// Bytes copied verbatim from the template.
    Text(Range<usize>),
    /// A doubled marker, rendered as the single marker byte.
    Literal(u8),
    /// A named slot.
    Slot(String),
}

impl MarkerSyntax {
    pub fn validate(&self) -> Result<()> {
        for marker in [self.open, self.close] {
            if !marker.is_ascii_punctuation() || marker == '_' {
                return Err(MkchalError::InvalidMarkers(format!(
                    "marker {marker:?} must be ASCII punctuation other than '_'"
                )));
            }
        }
        if self.open == self.close {
            return Err(MkchalError::InvalidMarkers(format!(
                "open and close markers must differ (both are {:?})",
                self.open
            )));
        }
        Ok(())
    }

    pub(crate) fn scan(&self, id: &TemplateId, content: &[u8]) -> Result<Vec<Segment>> {
        self.validate()?;
        // validate() guarantees both markers are single ASCII bytes.
        let open = self.open as u8;
        let close = self.close as u8;

        let syntax_error = |offset: usize, reason: String| MkchalError::TemplateSyntax {
            template: id.clone(),
            line: line_of(content, offset),
            reason,
        };

        let mut segments = Vec::new();
        let mut text_start = 0;
        let mut i = 0;

        while i < content.len() {
            let byte = content[i];
            if byte != open && byte != close {
                i += 1;
                continue;
            }

            if text_start < i {
                segments.push(Segment::Text(text_start..i));
            }

            if content.get(i + 1) == Some(&byte) {
                segments.push(Segment::Literal(byte));
                i += 2;
            } else if byte == close {
                return Err(syntax_error(
                    i,
                    format!("unmatched '{}' (write '{0}{0}' for a literal)", self.close),
                ));
            } else {
                let name_start = i + 1;
                let name_end = content[name_start..]
                    .iter()
                    .position(|b| !is_name_byte(*b))
                    .map_or(content.len(), |p| name_start + p);

                if content.get(name_end) != Some(&close) {
                    return Err(syntax_error(
                        i,
                        format!(
                            "'{}' does not start a placeholder (write '{0}{0}' for a literal)",
                            self.open
                        ),
                    ));
                }

                let name = &content[name_start..name_end];
                if name.is_empty() || name[0].is_ascii_digit() {
                    return Err(syntax_error(
                        i,
                        format!(
                            "invalid placeholder name {:?}",
                            String::from_utf8_lossy(name)
                        ),
                    ));
                }

                // Name bytes are ASCII by construction.
                segments.push(Segment::Slot(String::from_utf8_lossy(name).into_owned()));
                i = name_end + 1;
            }
            text_start = i;
        }

        if text_start < content.len() {
            segments.push(Segment::Text(text_start..content.len()));
        }

        Ok(segments)
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn line_of(content: &[u8], offset: usize) -> usize {
    content[..offset].iter().filter(|b| **b == b'\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(src: &str) -> Result<Vec<Segment>> {
        MarkerSyntax::default().scan(&TemplateId::new("pwn", "t"), src.as_bytes())
    }

    #[test]
    fn test_scan_slots_and_text() {
        let segments = scan("Hello {name}!").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Text(0..6),
                Segment::Slot("name".into()),
                Segment::Text(12..13),
            ]
        );
    }

    #[test]
    fn test_scan_escapes() {
        let segments = scan("{{ 0 }}").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Literal(b'{'),
                Segment::Text(2..5),
                Segment::Literal(b'}'),
            ]
        );
    }

    #[test]
    fn test_scan_triple_open_is_escape_then_slot() {
        let segments = scan("{{{x}").unwrap();
        assert_eq!(
            segments,
            vec![Segment::Literal(b'{'), Segment::Slot("x".into())]
        );
    }

    #[test]
    fn test_scan_unmatched_close() {
        let err = scan("int main() {{\n}\n").unwrap_err();
        match err {
            MkchalError::TemplateSyntax { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_scan_rejects_non_name_slot() {
        assert!(scan("char buf[8] = { 0 };").is_err());
        assert!(scan("{9lives}").is_err());
        assert!(scan("{}").is_err());
        assert!(scan("tail {name").is_err());
    }

    #[test]
    fn test_custom_markers() {
        let syntax = MarkerSyntax {
            open: '<',
            close: '>',
        };
        let segments = syntax
            .scan(&TemplateId::new("web", "t"), b"{raw} <name> <<")
            .unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Text(0..6),
                Segment::Slot("name".into()),
                Segment::Text(12..13),
                Segment::Literal(b'<'),
            ]
        );
    }

    #[test]
    fn test_validate_markers() {
        assert!(MarkerSyntax::default().validate().is_ok());
        assert!(MarkerSyntax { open: '%', close: '%' }.validate().is_err());
        assert!(MarkerSyntax { open: 'a', close: '}' }.validate().is_err());
        assert!(MarkerSyntax { open: '«', close: '»' }.validate().is_err());
        assert!(MarkerSyntax { open: '_', close: '}' }.validate().is_err());
    }

    #[test]
    fn test_scan_non_utf8_text_is_preserved() {
        let bytes = [0xffu8, b'{', b'a', b'}', 0xfe];
        let segments = MarkerSyntax::default()
            .scan(&TemplateId::new("rev", "bin"), &bytes)
            .unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Text(0..1),
                Segment::Slot("a".into()),
                Segment::Text(4..5),
            ]
        );
    }
}
