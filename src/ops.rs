//! Batch phases. Each one takes the collections it needs and hands back what
//! it produced; `run_all` strings them together.

use anyhow::{Context, Result};

use crate::config::{Config, Workspace};
use crate::extract::cache::ExtractionCache;
use crate::extract::resolver::EntityResolver;
use crate::extract::{discovery, resolve_pending, DocumentRecord, PageSource};
use crate::mail::auth::{fetch_access_token, GraphCredentials};
use crate::mail::graph::GraphMailer;
use crate::mail::{self, BatchSettings, MailTransport};
use crate::recon::{self, engine};
use crate::reports;
use crate::sync::{sync_artifacts, DirectoryMirror};
use crate::table::{xlsx, InvestorTable};

#[derive(Debug, Default, Clone, Copy)]
pub struct RunOptions {
    pub skip_cache_load: bool,
    pub reset_status: bool,
    pub send: bool,
    /// Pre-answers every confirmation with yes.
    pub assume_yes: bool,
}

pub async fn run_all(config: &Config, ts: &str, opts: RunOptions, source: &impl PageSource) -> Result<()> {
    tracing::info!("Starting run {}...", ts);
    let ws = config.workspace();

    prepare(&ws, ts)?;
    if opts.reset_status {
        run_reset_status(&ws, opts.assume_yes)?;
    }

    let documents = run_extraction(&ws, ts, opts.skip_cache_load, source)?;
    let table = run_reconciliation(&ws, ts, &documents)?;

    if opts.send {
        run_send(config, &ws, ts, table, opts.assume_yes).await?;
    }

    tracing::info!("Run {} complete.", ts);
    Ok(())
}

/// Snapshots the investor table before anything can rewrite it.
pub fn prepare(ws: &Workspace, ts: &str) -> Result<()> {
    ws.ensure()?;
    reports::snapshot_table(&ws.investors_path(), &ws.snapshots_dir(), ts)?;
    Ok(())
}

pub fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        tracing::info!("{} (yes)", prompt);
        return Ok(true);
    }
    Ok(dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

/// Clears every row's delivery state. Declining leaves the table untouched.
pub fn run_reset_status(ws: &Workspace, assume_yes: bool) -> Result<()> {
    let path = ws.investors_path();
    let table = xlsx::load(&path).with_context(|| format!("loading {:?}", path))?;
    let prompt = format!("Reset email status on all {} rows of {:?}?", table.rows.len(), path);
    if !confirm(&prompt, assume_yes)? {
        tracing::warn!("Status reset declined.");
        return Ok(());
    }
    xlsx::save(&table.with_status_reset(), &path)?;
    tracing::info!("Email status reset.");
    Ok(())
}

/// Cache load, discovery, resolution of pending documents, cache save and
/// dump. Returns the keyed document collection.
pub fn run_extraction(
    ws: &Workspace,
    ts: &str,
    skip_cache_load: bool,
    source: &impl PageSource,
) -> Result<Vec<DocumentRecord>> {
    let cache = ExtractionCache::new(ws.cache_file());
    let known = if skip_cache_load {
        tracing::info!("CACHE: Load skipped ({:?})", cache.path());
        Vec::new()
    } else {
        cache.load()
    };

    let found = discovery::discover(&ws.files_dir(), known)?;
    tracing::info!(
        "Discovered {} documents ({} new, {} unreadable entries)",
        found.records.len(),
        found.new_count,
        found.unreadable
    );

    let resolver = EntityResolver::new()?;
    let (records, stats) = resolve_pending(found.records, &ws.files_dir(), source, &resolver);
    tracing::info!(
        "Extraction: {} attempted, {} resolved, {} failed",
        stats.attempted,
        stats.resolved,
        stats.failed
    );

    let records = assign_keys(records);
    cache.save(&records)?;
    reports::write_document_dump(&ws.dumps_dir(), ts, &records)?;

    let issuing = records.iter().filter(|r| r.issuing_entity.is_some()).count();
    let receiving = records.iter().filter(|r| r.receiving_entity.is_some()).count();
    tracing::info!("Issuing entities resolved: {} of {}", issuing, records.len());
    tracing::info!("Receiving entities resolved: {} of {}", receiving, records.len());

    Ok(records)
}

pub fn assign_keys(records: Vec<DocumentRecord>) -> Vec<DocumentRecord> {
    records.into_iter().map(DocumentRecord::with_key).collect()
}

/// Joins the investor table against `documents`, writes the unmatched report
/// and persists the updated table.
pub fn run_reconciliation(ws: &Workspace, ts: &str, documents: &[DocumentRecord]) -> Result<InvestorTable> {
    let path = ws.investors_path();
    let mut table = xlsx::load(&path).with_context(|| format!("loading {:?}", path))?;

    for (group, count) in engine::document_counts(documents) {
        tracing::info!("Documents in {}: {}", group, count);
    }

    let rows = std::mem::take(&mut table.rows);
    let result = recon::reconcile(rows, documents);

    for (investment, count) in result.matched_counts() {
        tracing::info!("Matched rows for {}: {}", investment, count);
    }
    tracing::info!(
        "Unmatched documents: {} of {} (match rate {})",
        result.match_rate.unmatched,
        result.match_rate.total,
        result.match_rate
    );
    if result.duplicates.is_empty() {
        tracing::info!("No duplicate keys.");
    }
    for (key, paths) in &result.duplicates.document_keys {
        tracing::warn!("Duplicate document key {}: {}", key, paths.join(", "));
    }
    for (key, count) in &result.duplicates.investor_keys {
        tracing::warn!("Investor key {} appears on {} rows", key, count);
    }

    reports::write_unmatched_csv(&ws.logs_dir(), ts, &result.unmatched)?;

    let table = table.with_rows(result.investors);
    xlsx::save(&table, &path).with_context(|| format!("saving {:?}", path))?;
    Ok(table)
}

/// Confirms, authenticates and sends. Any failure here leaves the earlier
/// phases' output as it was.
pub async fn run_send(
    config: &Config,
    ws: &Workspace,
    ts: &str,
    table: InvestorTable,
    assume_yes: bool,
) -> Result<InvestorTable> {
    config.check_send_settings()?;

    let count = mail::eligible_count(&table, config.email_limit);
    if count == 0 {
        tracing::info!("Nothing to send.");
        return Ok(table);
    }
    let mode = if config.test_mode { "TEST MODE, to sender only" } else { "LIVE" };
    let prompt = format!("Send {} emails from {} ({})?", count, config.sender, mode);
    if !confirm(&prompt, assume_yes)? {
        tracing::warn!("Send declined.");
        return Ok(table);
    }

    let creds = GraphCredentials::from_env().context("Graph credentials")?;
    let client = reqwest::Client::new();
    let token = fetch_access_token(&client, &creds)
        .await
        .context("Graph authentication failed")?;
    let mailer = GraphMailer::new(client, &config.sender, token);

    deliver(&mailer, config, ws, ts, table).await
}

/// Sends the batch through `transport`, then writes the sent report and the
/// updated table.
pub async fn deliver<T: MailTransport>(
    transport: &T,
    config: &Config,
    ws: &Workspace,
    ts: &str,
    table: InvestorTable,
) -> Result<InvestorTable> {
    let files_root = ws.files_dir();
    let settings = BatchSettings {
        sender: &config.sender,
        tax_year: &config.tax_year,
        test_mode: config.test_mode,
        email_limit: config.email_limit,
        internal_recipients: &config.internal_recipients,
        files_root: &files_root,
        batch_timestamp: ts,
    };

    let (table, sent) = mail::send_batch(transport, table, &settings).await;
    let ok = sent.iter().filter(|r| r.email_status == "sent").count();
    tracing::info!("Sent {} of {} attempted emails", ok, sent.len());

    reports::write_sent_csv(&ws.logs_dir(), ts, &sent)?;
    let path = ws.investors_path();
    xlsx::save(&table, &path).with_context(|| format!("saving {:?}", path))?;
    Ok(table)
}

/// `send` subcommand: the current table as persisted by the last run.
pub async fn run_send_only(config: &Config, ts: &str, assume_yes: bool) -> Result<()> {
    let ws = config.workspace();
    prepare(&ws, ts)?;
    let path = ws.investors_path();
    let table = xlsx::load(&path).with_context(|| format!("loading {:?}", path))?;
    run_send(config, &ws, ts, table, assume_yes).await?;
    Ok(())
}

pub fn run_sync(config: &Config) -> Result<()> {
    let Some(dest) = &config.sync_dir else {
        anyhow::bail!("No sync_dir configured");
    };
    tracing::info!("Syncing artifacts to {:?}...", dest);
    sync_artifacts(config.workspace().root(), &DirectoryMirror::new(dest))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MailError;
    use crate::extract::tests::{k1_page, FakePages};
    use crate::mail::{Delivery, OutgoingMessage};
    use crate::table::EmailStatus;
    use rust_xlsxwriter::Workbook;
    use std::cell::RefCell;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        ws.ensure().unwrap();
        let group = ws.files_dir().join("ACME FUND");
        std::fs::create_dir_all(&group).unwrap();
        for name in ["jane.pdf", "john.pdf", "ACME Managers.pdf"] {
            std::fs::write(group.join(name), b"%PDF-1.4").unwrap();
        }
        (dir, ws)
    }

    fn write_investors(ws: &Workspace) {
        let mut book = Workbook::new();
        let sheet = book.add_worksheet();
        let header = [
            "matching_key",
            "first_name",
            "investment_name",
            "receiving_entity",
            "email_address_1",
            "email_type_1",
            "active",
        ];
        for (col, name) in header.iter().enumerate() {
            sheet.write_string(0, col as u16, *name).unwrap();
        }
        let rows = [
            ["ACME FUND#ACME FOREST LLC#JANE DOE", "Jane", "ACME FUND", "JANE DOE", "jane@example.com", "to"],
            ["ACME FUND#ACME FOREST LLC#NOBODY", "No", "ACME FUND", "NOBODY", "no@example.com", "to"],
        ];
        for (r, row) in rows.iter().enumerate() {
            for (col, value) in row.iter().enumerate() {
                sheet.write_string(r as u32 + 1, col as u16, *value).unwrap();
            }
            sheet.write_boolean(r as u32 + 1, 6, true).unwrap();
        }
        book.save(ws.investors_path()).unwrap();
    }

    fn pages() -> FakePages {
        FakePages::default().with("jane.pdf", &[&k1_page("ACME FOREST, LLC", "Jane Doe")])
    }

    struct AcceptAll {
        sent: RefCell<Vec<String>>,
    }

    impl MailTransport for AcceptAll {
        async fn send(&self, message: &OutgoingMessage) -> Result<Delivery, MailError> {
            self.sent.borrow_mut().push(message.subject.clone());
            Ok(Delivery::Accepted)
        }
    }

    #[test]
    fn extraction_is_stable_across_runs_with_the_cache() {
        let (_dir, ws) = workspace();
        let source = pages();

        let first = run_extraction(&ws, "t1", false, &source).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(source.calls.borrow().len(), 2);
        assert_eq!(
            first[0].matching_key.as_deref(),
            Some("acmefund#acmeforestllc#janedoe")
        );
        assert!(ws.dumps_dir().join("t1_documents.json").exists());

        let second = run_extraction(&ws, "t2", false, &source).unwrap();
        assert_eq!(second, first);
        // Only the unresolved document is retried.
        assert_eq!(source.calls.borrow().len(), 3);

        let fresh = run_extraction(&ws, "t3", true, &source).unwrap();
        assert_eq!(fresh, first);
        assert_eq!(source.calls.borrow().len(), 5);
    }

    #[test]
    fn reconciliation_persists_matches_and_reports_strays() {
        let (_dir, ws) = workspace();
        write_investors(&ws);
        let documents = run_extraction(&ws, "t1", false, &pages()).unwrap();

        let table = run_reconciliation(&ws, "t1", &documents).unwrap();
        let jane = table.rows.iter().find(|r| r.receiving_entity == "JANE DOE").unwrap();
        assert_eq!(jane.matched_k1_filename.as_deref(), Some("ACME FUND/jane.pdf"));
        assert_eq!(jane.email_status, Some(EmailStatus::FileFound));

        let reloaded = xlsx::load(&ws.investors_path()).unwrap();
        assert_eq!(reloaded.rows, table.rows);

        let unmatched = std::fs::read_to_string(ws.logs_dir().join("t1_unmatched.csv")).unwrap();
        assert!(unmatched.contains("ACME FUND/john.pdf"));
        assert!(!unmatched.contains("jane.pdf"));
    }

    #[tokio::test]
    async fn delivery_updates_table_and_writes_report() {
        let (_dir, ws) = workspace();
        write_investors(&ws);
        let documents = run_extraction(&ws, "t1", false, &pages()).unwrap();
        let table = run_reconciliation(&ws, "t1", &documents).unwrap();

        let config = Config {
            sender: "k1@fund.example".into(),
            tax_year: "2023".into(),
            work_dir: ws.root().to_path_buf(),
            ..Config::default()
        };
        let transport = AcceptAll { sent: RefCell::new(Vec::new()) };
        let table = deliver(&transport, &config, &ws, "t2", table).await.unwrap();

        assert_eq!(
            *transport.sent.borrow(),
            vec!["ACME FUND K-1 | TAX YEAR 2023 | JANE DOE".to_string()]
        );
        let jane = table.rows.iter().find(|r| r.receiving_entity == "JANE DOE").unwrap();
        assert_eq!(jane.email_status, Some(EmailStatus::Sent));
        assert_eq!(jane.email_batch_timestamp.as_deref(), Some("t2"));
        assert!(ws.logs_dir().join("t2_sent.csv").exists());

        // A second reconciliation keeps the sent status.
        let again = run_reconciliation(&ws, "t3", &documents).unwrap();
        let jane = again.rows.iter().find(|r| r.receiving_entity == "JANE DOE").unwrap();
        assert_eq!(jane.email_status, Some(EmailStatus::Sent));
    }

    /// Accepts everyone except NOBODY, who gets an enormous error page.
    struct HugeRejection;

    impl MailTransport for HugeRejection {
        async fn send(&self, message: &OutgoingMessage) -> Result<Delivery, MailError> {
            if message.subject.ends_with("| NOBODY") {
                return Ok(Delivery::Rejected { status: 500, body: "x".repeat(40_000) });
            }
            Ok(Delivery::Accepted)
        }
    }

    #[tokio::test]
    async fn oversized_rejection_does_not_lose_the_batch() {
        let (_dir, ws) = workspace();
        write_investors(&ws);
        let documents = run_extraction(&ws, "t1", false, &pages()).unwrap();
        let mut table = run_reconciliation(&ws, "t1", &documents).unwrap();
        for row in table.rows.iter_mut().filter(|r| r.receiving_entity == "NOBODY") {
            row.matched_k1_filename = Some("ACME FUND/john.pdf".into());
        }

        let config = Config {
            sender: "k1@fund.example".into(),
            tax_year: "2023".into(),
            work_dir: ws.root().to_path_buf(),
            ..Config::default()
        };
        deliver(&HugeRejection, &config, &ws, "t2", table).await.unwrap();

        let saved = xlsx::load(&ws.investors_path()).unwrap();
        let jane = saved.rows.iter().find(|r| r.receiving_entity == "JANE DOE").unwrap();
        assert_eq!(jane.email_status, Some(EmailStatus::Sent));
        assert_eq!(jane.email_batch_timestamp.as_deref(), Some("t2"));
        let nobody = saved.rows.iter().find(|r| r.receiving_entity == "NOBODY").unwrap();
        match &nobody.email_status {
            Some(EmailStatus::Fail(detail)) => {
                assert!(detail.starts_with("500 x"));
                assert_eq!(detail.chars().count(), crate::table::status::DETAIL_LIMIT);
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn reset_with_yes_clears_status() {
        let (_dir, ws) = workspace();
        write_investors(&ws);
        let documents = run_extraction(&ws, "t1", false, &pages()).unwrap();
        run_reconciliation(&ws, "t1", &documents).unwrap();

        run_reset_status(&ws, true).unwrap();
        let table = xlsx::load(&ws.investors_path()).unwrap();
        assert!(table.rows.iter().all(|r| r.email_status.is_none()));
    }

    #[test]
    fn sync_requires_a_destination() {
        assert!(run_sync(&Config::default()).is_err());
    }
}
