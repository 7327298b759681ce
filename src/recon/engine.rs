use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use super::normalize::normalize_key;
use crate::extract::DocumentRecord;
use crate::table::{EmailStatus, InvestorRecord};

/// Share of documents that found an investor row. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchRate {
    pub unmatched: usize,
    pub total: usize,
}

impl MatchRate {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        1.0 - self.unmatched as f64 / self.total as f64
    }
}

impl fmt::Display for MatchRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}%", self.ratio() * 100.0)
    }
}

/// Keys that make the join fan out. Reported, never resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateReport {
    /// Normalized key -> document paths sharing it.
    pub document_keys: BTreeMap<String, Vec<String>>,
    /// Normalized key -> number of investor rows carrying it.
    pub investor_keys: BTreeMap<String, usize>,
}

impl DuplicateReport {
    pub fn is_empty(&self) -> bool {
        self.document_keys.is_empty() && self.investor_keys.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Investor rows after the left join, sorted by investment and receiving
    /// entity. A row matching N documents appears N times.
    pub investors: Vec<InvestorRecord>,
    /// Documents whose key is absent from the investor table.
    pub unmatched: Vec<DocumentRecord>,
    pub duplicates: DuplicateReport,
    pub match_rate: MatchRate,
}

impl Reconciliation {
    /// Matched output rows per upper-cased investment name.
    pub fn matched_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for row in self.investors.iter().filter(|r| r.matched_k1_filename.is_some()) {
            *counts.entry(row.investment_name.to_uppercase()).or_insert(0) += 1;
        }
        counts
    }
}

/// Left join of investor rows against documents on the normalized key,
/// followed by the `file_found` status write-back.
pub fn reconcile(investors: Vec<InvestorRecord>, documents: &[DocumentRecord]) -> Reconciliation {
    let keyed: Vec<(String, &DocumentRecord)> = documents
        .iter()
        .map(|doc| {
            let key = doc.matching_key.clone().unwrap_or_else(|| doc.computed_key());
            (key, doc)
        })
        .collect();

    let mut by_key: HashMap<&str, Vec<&DocumentRecord>> = HashMap::new();
    for (key, doc) in &keyed {
        by_key.entry(key.as_str()).or_default().push(*doc);
    }

    let investor_keys: Vec<String> = investors.iter().map(|r| normalize_key(&r.matching_key)).collect();
    let duplicates = find_duplicates(&by_key, &investor_keys);

    let mut joined = Vec::with_capacity(investors.len());
    for (row, key) in investors.into_iter().zip(&investor_keys) {
        match by_key.get(key.as_str()) {
            Some(docs) => {
                for doc in docs {
                    let mut matched = row.clone();
                    matched.matched_k1_filename = Some(doc.path.clone());
                    joined.push(matched);
                }
            }
            None => {
                let mut unmatched = row;
                unmatched.matched_k1_filename = None;
                joined.push(unmatched);
            }
        }
    }

    for row in &mut joined {
        mark_file_found(row);
    }
    joined.sort_by(|a, b| {
        (&a.investment_name, &a.receiving_entity).cmp(&(&b.investment_name, &b.receiving_entity))
    });

    let known: HashSet<&str> = investor_keys.iter().map(String::as_str).collect();
    let mut unmatched: Vec<DocumentRecord> = keyed
        .iter()
        .filter(|(key, _)| !known.contains(key.as_str()))
        .map(|(_, doc)| (*doc).clone())
        .collect();
    unmatched.sort_by(|a, b| document_order(a).cmp(&document_order(b)));

    let match_rate = MatchRate {
        unmatched: unmatched.len(),
        total: documents.len(),
    };

    Reconciliation {
        investors: joined,
        unmatched,
        duplicates,
        match_rate,
    }
}

/// Sets `file_found` on a matched row with no status. Existing statuses,
/// `sent` in particular, are left alone.
pub fn mark_file_found(row: &mut InvestorRecord) {
    if row.matched_k1_filename.is_some() && row.email_status.is_none() {
        row.email_status = Some(EmailStatus::FileFound);
    }
}

/// Documents per group label.
pub fn document_counts(documents: &[DocumentRecord]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for doc in documents {
        *counts.entry(doc.group_label.clone()).or_insert(0) += 1;
    }
    counts
}

/// Group label, then receiving entity with unresolved ones last.
fn document_order(doc: &DocumentRecord) -> (&str, bool, &str) {
    (
        doc.group_label.as_str(),
        doc.receiving_entity.is_none(),
        doc.receiving_entity.as_deref().unwrap_or_default(),
    )
}

fn find_duplicates(by_key: &HashMap<&str, Vec<&DocumentRecord>>, investor_keys: &[String]) -> DuplicateReport {
    let document_keys = by_key
        .iter()
        .filter(|(_, docs)| docs.len() > 1)
        .map(|(key, docs)| (key.to_string(), docs.iter().map(|d| d.path.clone()).collect()))
        .collect();

    let mut investor_counts: BTreeMap<String, usize> = BTreeMap::new();
    for key in investor_keys {
        *investor_counts.entry(key.clone()).or_insert(0) += 1;
    }
    investor_counts.retain(|_, n| *n > 1);

    DuplicateReport {
        document_keys,
        investor_keys: investor_counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::tests::investor;

    fn doc(group: &str, file: &str, issuing: &str, receiving: &str) -> DocumentRecord {
        let mut record = DocumentRecord::new(group, file);
        record.issuing_entity = Some(issuing.into());
        record.receiving_entity = Some(receiving.into());
        record.with_key()
    }

    #[test]
    fn left_join_fills_filenames_and_reports_unmatched() {
        let investors = vec![
            investor("ACME FUND#ACME FOREST LLC#JOHN Q. PUBLIC", "ACME FUND", "JOHN Q. PUBLIC"),
            investor("acmefund#acmeforestllc#janedoe", "ACME FUND", "JANE DOE"),
            investor("betafund#betallc#nobody", "BETA FUND", "NOBODY"),
        ];
        let documents = vec![
            doc("ACME FUND", "public.pdf", "Acme Forest, LLC", "John Q Public"),
            doc("ACME FUND", "doe.pdf", "ACME FOREST LLC", "JANE DOE"),
            doc("BETA FUND", "stray.pdf", "BETA LLC", "STRANGER"),
            DocumentRecord::new("ACME FUND", "unreadable.pdf"),
        ];

        let result = reconcile(investors, &documents);

        assert_eq!(result.investors.len(), 3);
        let by_entity: HashMap<&str, &InvestorRecord> = result
            .investors
            .iter()
            .map(|r| (r.receiving_entity.as_str(), r))
            .collect();
        assert_eq!(by_entity["JOHN Q. PUBLIC"].matched_k1_filename.as_deref(), Some("ACME FUND/public.pdf"));
        assert_eq!(by_entity["JANE DOE"].matched_k1_filename.as_deref(), Some("ACME FUND/doe.pdf"));
        assert_eq!(by_entity["NOBODY"].matched_k1_filename, None);
        assert_eq!(by_entity["NOBODY"].email_status, None);

        let unmatched: Vec<&str> = result.unmatched.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(unmatched, vec!["ACME FUND/unreadable.pdf", "BETA FUND/stray.pdf"]);
        assert_eq!(result.match_rate, MatchRate { unmatched: 2, total: 4 });
        assert!(result.duplicates.is_empty());
    }

    #[test]
    fn output_rows_are_sorted_by_investment_then_entity() {
        let investors = vec![
            investor("betafund#b#zed", "BETA FUND", "ZED"),
            investor("acmefund#a#mary", "ACME FUND", "MARY"),
            investor("acmefund#a#al", "ACME FUND", "AL"),
        ];
        let result = reconcile(investors, &[]);
        let order: Vec<&str> = result.investors.iter().map(|r| r.receiving_entity.as_str()).collect();
        assert_eq!(order, vec!["AL", "MARY", "ZED"]);
        assert_eq!(result.match_rate.to_string(), "100.00%");
    }

    #[test]
    fn status_write_back_never_downgrades() {
        let mut fresh = investor("acmefund#acme#jane", "ACME FUND", "JANE");
        fresh.matched_k1_filename = Some("ACME FUND/jane.pdf".into());
        mark_file_found(&mut fresh);
        assert_eq!(fresh.email_status, Some(EmailStatus::FileFound));

        let mut sent = investor("acmefund#acme#jane", "ACME FUND", "JANE");
        sent.matched_k1_filename = Some("ACME FUND/jane.pdf".into());
        sent.email_status = Some(EmailStatus::Sent);
        mark_file_found(&mut sent);
        assert_eq!(sent.email_status, Some(EmailStatus::Sent));

        let mut failed = investor("acmefund#acme#jane", "ACME FUND", "JANE");
        failed.email_status = Some(EmailStatus::Fail("500 boom".into()));
        let result = reconcile(
            vec![sent.clone(), failed],
            &[doc("ACME FUND", "jane.pdf", "ACME", "JANE")],
        );
        assert!(result.investors.iter().any(|r| r.email_status == Some(EmailStatus::Sent)));
        assert!(result
            .investors
            .iter()
            .any(|r| r.email_status == Some(EmailStatus::Fail("500 boom".into()))));
    }

    #[test]
    fn colliding_document_keys_yield_one_row_each() {
        let investors = vec![investor("acmefund#acme#jane", "ACME FUND", "JANE")];
        let documents = vec![
            doc("ACME FUND", "jane.pdf", "ACME", "JANE"),
            doc("ACME FUND", "jane (1).pdf", "A.C.M.E.", "Jane"),
        ];
        let result = reconcile(investors, &documents);

        let mut files: Vec<&str> = result
            .investors
            .iter()
            .filter_map(|r| r.matched_k1_filename.as_deref())
            .collect();
        files.sort();
        assert_eq!(files, vec!["ACME FUND/jane (1).pdf", "ACME FUND/jane.pdf"]);
        assert!(result.duplicates.investor_keys.is_empty());
        assert_eq!(result.duplicates.document_keys["acmefund#acme#jane"].len(), 2);
        assert!(result.unmatched.is_empty());
        assert_eq!(result.matched_counts()["ACME FUND"], 2);
    }

    #[test]
    fn repeated_investor_keys_are_flagged() {
        let investors = vec![
            investor("acmefund#acme#jane", "ACME FUND", "JANE"),
            investor("ACME FUND#ACME#JANE", "ACME FUND", "JANE"),
        ];
        let result = reconcile(investors, &[doc("ACME FUND", "jane.pdf", "ACME", "JANE")]);
        assert_eq!(result.duplicates.investor_keys["acmefund#acme#jane"], 2);
        assert_eq!(result.investors.len(), 2);
    }

    #[test]
    fn match_rate_is_reported_with_two_decimals() {
        let rate = MatchRate { unmatched: 7, total: 50 };
        assert_eq!(rate.to_string(), "86.00%");
        assert!((rate.ratio() - 0.86).abs() < 1e-12);
    }
}
