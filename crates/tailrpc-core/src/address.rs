use regex::Regex;

use crate::error::CoreError;

/// Recognizes the recipient patterns that address one node.
///
/// For a derived pattern on `A.B.C` the accepted addresses are `A.B.C`,
/// `A.B.*`, `A.*`, `A*` and `*`. Matching runs per line of a newline-joined
/// `to` field and is anchored at both ends of each line.
#[derive(Debug, Clone)]
pub struct AddressPattern {
    regex: Regex,
    derived_from: Option<String>,
}

impl AddressPattern {
    /// Builds the pattern derived from a hierarchical dot-separated name.
    pub fn for_name(name: &str) -> Result<Self, CoreError> {
        validate_node_name(name)?;

        let mut alternatives = vec![format!("^{}$", regex::escape(name))];

        let segments: Vec<&str> = name.split('.').collect();
        let mut prefix = String::new();
        for segment in &segments[..segments.len() - 1] {
            prefix.push_str(&regex::escape(segment));
            prefix.push_str(r"\.");
            alternatives.push(format!(r"^{prefix}\*$"));
        }

        if let Some(first) = name.chars().next() {
            alternatives.push(format!(r"^{}\*$", regex::escape(first.encode_utf8(&mut [0; 4]))));
        }
        alternatives.push(r"^\*$".to_string());

        let source = alternatives
            .iter()
            .map(|alt| format!("(?:{alt})"))
            .collect::<Vec<_>>()
            .join("|");
        Ok(Self {
            regex: Regex::new(&source)?,
            derived_from: Some(name.to_string()),
        })
    }

    /// Compiles a caller-supplied regular expression, replacing derivation entirely.
    pub fn custom(pattern: &str) -> Result<Self, CoreError> {
        Ok(Self::from_regex(Regex::new(pattern)?))
    }

    pub fn from_regex(regex: Regex) -> Self {
        Self {
            regex,
            derived_from: None,
        }
    }

    /// True if any line of `to` addresses this node.
    pub fn matches(&self, to: &str) -> bool {
        to.lines().any(|line| self.regex.is_match(line))
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// The node name this pattern was derived from, if it was not custom.
    pub fn derived_from(&self) -> Option<&str> {
        self.derived_from.as_deref()
    }
}

/// Node names are non-empty and free of recipient separators and wildcards.
pub fn validate_node_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::InvalidInput("node name must not be empty"));
    }
    if name.contains(['\n', '\r']) {
        return Err(CoreError::InvalidInput(
            "node name must not contain line breaks",
        ));
    }
    if name.contains(',') {
        return Err(CoreError::InvalidInput("node name must not contain ','"));
    }
    if name.contains('*') {
        return Err(CoreError::InvalidInput("node name must not contain '*'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{validate_node_name, AddressPattern};

    #[test]
    fn derived_pattern_accepts_every_addressing_form() {
        let p = AddressPattern::for_name("A.B.C").expect("valid name");
        for to in ["A.B.C", "A.B.*", "A.*", "A*", "*"] {
            assert!(p.matches(to), "{to} should address A.B.C");
        }
    }

    #[test]
    fn derived_pattern_rejects_other_nodes_and_partial_matches() {
        let p = AddressPattern::for_name("A.B.C").expect("valid name");
        for to in ["A.B.D", "X", "A.B.C.D", "A.B", "xA.B.C", "A.B.C ", "B*", "A.B.C.*", ""] {
            assert!(!p.matches(to), "{to} should not address A.B.C");
        }
    }

    #[test]
    fn matching_is_per_line_across_recipients() {
        let p = AddressPattern::for_name("Main").expect("valid name");
        assert!(p.matches("Other\nMain"));
        assert!(p.matches("Other\nM*"));
        assert!(!p.matches("Other\nMainframe"));
        assert!(!p.matches("Other\nX.*"));
    }

    #[test]
    fn single_segment_name_has_no_prefix_wildcards() {
        let p = AddressPattern::for_name("Main").expect("valid name");
        assert!(p.matches("Main"));
        assert!(p.matches("M*"));
        assert!(!p.matches("Main.*"));
    }

    #[test]
    fn names_with_regex_metacharacters_are_escaped() {
        let p = AddressPattern::for_name("node(1).rack+[2]").expect("valid name");
        assert!(p.matches("node(1).rack+[2]"));
        assert!(p.matches("node(1).*"));
        assert!(p.matches("n*"));
        assert!(!p.matches("node1.rack2"));
        assert_eq!(p.derived_from(), Some("node(1).rack+[2]"));
    }

    #[test]
    fn custom_pattern_overrides_derivation() {
        let p = AddressPattern::custom("^LOG$").expect("valid regex");
        assert!(p.matches("LOG"));
        assert!(p.matches("A\nLOG"));
        assert!(!p.matches("*"));
        assert_eq!(p.derived_from(), None);
        assert!(AddressPattern::custom("(").is_err());
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(validate_node_name("").is_err());
        assert!(validate_node_name("A,B").is_err());
        assert!(validate_node_name("A*").is_err());
        assert!(validate_node_name("A\nB").is_err());
        assert!(validate_node_name("A.B.C").is_ok());
        assert!(AddressPattern::for_name("").is_err());
    }
}
