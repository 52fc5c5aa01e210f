//! Terms: the unit of the inverted index.

use std::cmp::Ordering;
use std::fmt;

/// A (field, text) pair.
///
/// Terms order by field name first and then by the UTF-8 bytes of the text,
/// which is the order the term dictionary is written in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Term {
    field: String,
    text: String,
}

impl Term {
    pub fn new<F: Into<String>, T: Into<String>>(field: F, text: T) -> Self {
        Term {
            field: field.into(),
            text: text.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// A term in the same field with different text.
    pub fn with_text<T: Into<String>>(&self, text: T) -> Self {
        Term {
            field: self.field.clone(),
            text: text.into(),
        }
    }
}

impl Ord for Term {
    fn cmp(&self, other: &Self) -> Ordering {
        self.field
            .cmp(&other.field)
            .then_with(|| self.text.as_bytes().cmp(other.text.as_bytes()))
    }
}

impl PartialOrd for Term {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_field_then_text() {
        let mut terms = vec![
            Term::new("title", "apple"),
            Term::new("body", "zebra"),
            Term::new("body", "Zebra"),
            Term::new("body", "apple"),
        ];
        terms.sort();

        let rendered: Vec<String> = terms.iter().map(|t| t.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["body:Zebra", "body:apple", "body:zebra", "title:apple"]
        );
    }

    #[test]
    fn test_byte_order_for_non_ascii() {
        // U+00E9 (0xC3 0xA9) sorts after every ASCII byte
        assert!(Term::new("f", "z") < Term::new("f", "é"));
        assert_eq!(Term::new("f", "a").with_text("b"), Term::new("f", "b"));
    }
}
