//! Entity resolution for the Schedule K-1 (Form 1065) page layout.
//!
//! The partnership and partner names sit three lines below their section
//! headers. Text extraction does not always honor that, so a small set of
//! correction rules is applied on top of the fixed offset.

use regex::Regex;

use crate::error::ExtractError;

const PARTNERSHIP_ANCHOR: &str = "Part I Information About the Partnership";
const PARTNER_ANCHOR: &str = "Part II Information About the Partner";
const ENTITY_OFFSET: usize = 3;

/// Second half of a partnership name that wrapped onto its own line.
const WRAPPED_FRAGMENT: &str = "investors llc";
const CID_ARTIFACT: &str = r" \(cid:\d{3}\)X";

/// Receiving-entity correction: when `pattern` matches the naive line, the
/// real value is one line above if `shift_up` is set.
#[derive(Debug, Clone)]
pub struct ShiftRule {
    pattern: Regex,
    shift_up: bool,
}

impl ShiftRule {
    /// Case-insensitive whole-word match on `phrase`.
    pub fn word(phrase: &str, shift_up: bool) -> Result<Self, ExtractError> {
        let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(phrase)))?;
        Ok(Self { pattern, shift_up })
    }

    pub fn matches(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntities {
    pub issuing: String,
    pub receiving: String,
}

#[derive(Debug, Clone)]
pub struct EntityResolver {
    receiving_rules: Vec<ShiftRule>,
    cid_artifact: Regex,
}

impl EntityResolver {
    /// Resolver with the street-line rules observed on real forms.
    pub fn new() -> Result<Self, ExtractError> {
        Self::with_receiving_rules(vec![
            ShiftRule::word("st", true)?,
            ShiftRule::word("street", true)?,
        ])
    }

    /// Rules are evaluated in order and the first match wins, so specific
    /// phrases must come before the broad words they contain.
    pub fn with_receiving_rules(receiving_rules: Vec<ShiftRule>) -> Result<Self, ExtractError> {
        Ok(Self {
            receiving_rules,
            cid_artifact: Regex::new(CID_ARTIFACT)?,
        })
    }

    /// Both entities, or nothing. A half-resolved page is not kept.
    pub fn resolve(&self, lines: &[String]) -> Option<ResolvedEntities> {
        let issuing = self.issuing_entity(lines)?;
        let receiving = self.receiving_entity(lines)?;
        Some(ResolvedEntities { issuing, receiving })
    }

    pub fn issuing_entity(&self, lines: &[String]) -> Option<String> {
        let anchor = find_anchor(lines, PARTNERSHIP_ANCHOR)?;
        let index = anchor + ENTITY_OFFSET;
        let mut value = lines.get(index)?.trim().to_string();

        if value.to_lowercase() == WRAPPED_FRAGMENT {
            let head = lines.get(index - 1)?.trim();
            value = format!("{head} {value}");
        }

        let value = self.cid_artifact.replace_all(&value, "").trim().to_string();
        non_empty(value)
    }

    pub fn receiving_entity(&self, lines: &[String]) -> Option<String> {
        let anchor = find_anchor(lines, PARTNER_ANCHOR)?;
        let index = anchor + ENTITY_OFFSET;
        let naive = lines.get(index)?.trim();

        let value = match self.receiving_rules.iter().find(|rule| rule.matches(naive)) {
            Some(rule) if rule.shift_up => lines.get(index - 1)?.trim(),
            _ => naive,
        };

        non_empty(value.to_string())
    }
}

/// Last line containing `marker`. Instruction text earlier on the page can
/// quote a section header; the form's own header comes after it.
fn find_anchor(lines: &[String], marker: &str) -> Option<usize> {
    lines.iter().rposition(|line| line.contains(marker))
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(partnership: &[&str], partner: &[&str]) -> Vec<String> {
        let mut lines = vec!["Schedule K-1 (Form 1065) 2023".to_string()];
        lines.push(PARTNERSHIP_ANCHOR.to_string());
        lines.extend(partnership.iter().map(|s| s.to_string()));
        lines.push(PARTNER_ANCHOR.to_string());
        lines.extend(partner.iter().map(|s| s.to_string()));
        lines
    }

    #[test]
    fn takes_the_line_three_below_each_anchor() {
        let lines = page(
            &["A Partnership's EIN", "12-3456789", "  ACME FOREST LLC  ", "100 MAIN AVE"],
            &["C Partner's SSN", "***-**-1234", "JOHN Q. PUBLIC", "PO BOX 9"],
        );
        let resolver = EntityResolver::new().unwrap();
        let entities = resolver.resolve(&lines).unwrap();
        assert_eq!(entities.issuing, "ACME FOREST LLC");
        assert_eq!(entities.receiving, "JOHN Q. PUBLIC");
    }

    #[test]
    fn joins_wrapped_partnership_name() {
        let lines = page(
            &["A Partnership's EIN", "GREAT LAKES TIMBER", "Investors LLC"],
            &["C", "D", "JANE DOE"],
        );
        let resolver = EntityResolver::new().unwrap();
        assert_eq!(
            resolver.issuing_entity(&lines).as_deref(),
            Some("GREAT LAKES TIMBER Investors LLC")
        );
    }

    #[test]
    fn strips_cid_decoding_artifact() {
        let lines = page(&["A", "B", "ACME FOREST LLC (cid:123)X"], &["C", "D", "JANE DOE"]);
        let resolver = EntityResolver::new().unwrap();
        assert_eq!(resolver.issuing_entity(&lines).as_deref(), Some("ACME FOREST LLC"));
    }

    #[test]
    fn street_word_selects_line_above() {
        let lines = page(&["A", "B", "ACME FOREST LLC"], &["C", "JANE DOE", "12 Elm Street"]);
        let resolver = EntityResolver::new().unwrap();
        assert_eq!(resolver.receiving_entity(&lines).as_deref(), Some("JANE DOE"));
    }

    #[test]
    fn street_abbreviation_is_whole_word_only() {
        let lines = page(&["A", "B", "ACME"], &["C", "WRONG", "STANLEY HOLDINGS LLC"]);
        let resolver = EntityResolver::new().unwrap();
        assert_eq!(
            resolver.receiving_entity(&lines).as_deref(),
            Some("STANLEY HOLDINGS LLC")
        );

        let lines = page(&["A", "B", "ACME"], &["C", "JANE DOE", "40 W 57TH ST"]);
        assert_eq!(resolver.receiving_entity(&lines).as_deref(), Some("JANE DOE"));
    }

    #[test]
    fn first_matching_rule_wins() {
        let lines = page(&["A", "B", "ACME"], &["C", "PO BOX 1", "MAIN STREET PARTNERS LP"]);

        let specific_first = EntityResolver::with_receiving_rules(vec![
            ShiftRule::word("main street partners", false).unwrap(),
            ShiftRule::word("street", true).unwrap(),
        ])
        .unwrap();
        assert_eq!(
            specific_first.receiving_entity(&lines).as_deref(),
            Some("MAIN STREET PARTNERS LP")
        );

        let broad_first = EntityResolver::with_receiving_rules(vec![
            ShiftRule::word("street", true).unwrap(),
            ShiftRule::word("main street partners", false).unwrap(),
        ])
        .unwrap();
        assert_eq!(broad_first.receiving_entity(&lines).as_deref(), Some("PO BOX 1"));
    }

    #[test]
    fn repeated_header_uses_the_last_occurrence() {
        let mut lines = vec![
            format!("See {} for the name to report", PARTNERSHIP_ANCHOR),
            "instructions".to_string(),
            "continued".to_string(),
            "NOT AN ENTITY".to_string(),
        ];
        lines.extend(page(&["A", "B", "ACME FOREST LLC"], &["C", "D", "JANE DOE"]));
        let resolver = EntityResolver::new().unwrap();
        assert_eq!(resolver.issuing_entity(&lines).as_deref(), Some("ACME FOREST LLC"));
        assert_eq!(resolver.receiving_entity(&lines).as_deref(), Some("JANE DOE"));
    }

    #[test]
    fn missing_anchor_or_short_page_resolves_to_nothing() {
        let resolver = EntityResolver::new().unwrap();

        let no_partner: Vec<String> = page(&["A", "B", "ACME"], &[])
            .into_iter()
            .filter(|l| l != PARTNER_ANCHOR)
            .collect();
        assert!(resolver.resolve(&no_partner).is_none());

        let truncated = page(&["A", "B", "ACME"], &["C", "D"]);
        assert!(resolver.receiving_entity(&truncated).is_none());
        assert!(resolver.resolve(&truncated).is_none());
    }
}
