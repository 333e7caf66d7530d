//! Fetch and extract: turns the period's statements into extracted records.

use crate::api::{Document, DocumentFilter, ExtractedStatement};
use crate::checkpoint::RunInfo;
use crate::config::AccountRule;
use crate::error::PipelineError;
use crate::model::{Period, Record, TxnDate, UNKNOWN_ACCOUNT};
use crate::pipeline::Context;
use crate::Result;
use anyhow::Context as _;
use futures_util::stream::{self, StreamExt};
use regex::Regex;
use tracing::{debug, info, warn};

/// Decides which configured account a statement belongs to.
#[derive(Debug, Clone)]
pub(crate) struct AccountResolver {
    rules: Vec<CompiledRule>,
    accounts: Vec<String>,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    pattern: Regex,
    subject: Option<String>,
    account: String,
}

impl AccountResolver {
    pub(crate) fn new(rules: &[AccountRule], accounts: &[String]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    pattern: Regex::new(&rule.pattern)
                        .with_context(|| format!("Bad account rule pattern '{}'", rule.pattern))?,
                    subject: rule
                        .subject
                        .as_deref()
                        .map(|s| s.trim().to_lowercase())
                        .filter(|s| !s.is_empty()),
                    account: rule.account.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            rules,
            accounts: accounts.to_vec(),
        })
    }

    /// The first rule matching the document wins. Failing that, the extractor's guess is accepted
    /// if it names a configured account. Anything else is the unknown account.
    pub(crate) fn resolve(&self, document: &Document, hint: Option<&str>) -> String {
        let context = document.context.to_lowercase();
        for rule in &self.rules {
            let subject_ok = rule
                .subject
                .as_deref()
                .map_or(true, |s| context.contains(s));
            if subject_ok && rule.pattern.is_match(&document.source_ref) {
                return rule.account.clone();
            }
        }
        if let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) {
            if let Some(account) = self
                .accounts
                .iter()
                .find(|a| a.eq_ignore_ascii_case(hint))
            {
                return account.clone();
            }
            debug!("'{hint}' from {} is not a configured account", document.source_ref);
        }
        UNKNOWN_ACCOUNT.to_string()
    }
}

/// Fetches the documents for `run`, extracts them concurrently and returns the records of every
/// document that extracted cleanly, in document order.
pub(super) async fn run(ctx: &mut Context, run: &RunInfo) -> Result<Vec<Record>> {
    let filter = DocumentFilter::new(run.period, &ctx.mail);
    let documents = ctx
        .collaborators
        .fetch
        .list_matching_documents(&filter)
        .await?;
    info!("Fetched {} document(s)", documents.len());

    let extractor = ctx.collaborators.extract.as_ref();
    let extracted: Vec<(&Document, Result<ExtractedStatement>)> = stream::iter(documents.iter())
        .map(|doc| async move { (doc, extractor.extract(doc).await) })
        .buffered(ctx.extract_concurrency.max(1))
        .collect()
        .await;

    let mut records = Vec::new();
    for (doc, result) in extracted {
        let statement = match result {
            Ok(statement) => statement,
            Err(e) => {
                let skipped = PipelineError::ExtractFailed {
                    source_ref: doc.source_ref.clone(),
                    reason: format!("{e:#}"),
                };
                warn!("Skipping document: {skipped}");
                continue;
            }
        };

        let account = ctx.accounts.resolve(doc, statement.account.as_deref());
        let mut items: Vec<Record> = statement
            .items
            .into_iter()
            .map(|item| Record::from_raw(&doc.source_ref, &account, item))
            .collect();
        if ctx.period_filter {
            items = within_period(items, run.period, &doc.source_ref);
        }
        info!(
            "Extracted {} line item(s) from {} as {account}",
            items.len(),
            doc.source_ref
        );
        if items.is_empty() {
            continue;
        }

        if ctx.options.preview {
            println!("{}", preview_statement(&doc.source_ref, &account, &items));
            let keep = ctx
                .collaborators
                .confirm
                .confirm(&format!("Keep the {} line item(s) from {}? (yes/no)", items.len(), doc.source_ref))
                .await?;
            if !keep {
                info!("Skipping {} at the user's request", doc.source_ref);
                continue;
            }
        }
        records.append(&mut items);
    }
    Ok(records)
}

/// Drops records dated outside `period`. Records without a readable date are kept.
fn within_period(records: Vec<Record>, period: Period, source_ref: &str) -> Vec<Record> {
    records
        .into_iter()
        .filter(|r| match r.date() {
            TxnDate::Known(date) if !period.contains_with_grace(date) => {
                warn!(
                    "Dropping '{}' from {source_ref}: {date} is outside {period}",
                    r.description()
                );
                false
            }
            _ => true,
        })
        .collect()
}

/// A plain-text table of one statement's line items.
fn preview_statement(source_ref: &str, account: &str, records: &[Record]) -> String {
    let mut out = format!("{source_ref} ({account})\n");
    for r in records {
        out.push_str(&format!(
            "  {:<10}  {:>12}  {}\n",
            r.date().to_string(),
            r.amount().to_string(),
            r.description()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Amount, Direction, RawLineItem};
    use std::str::FromStr;

    fn doc(source_ref: &str, context: &str) -> Document {
        Document {
            source_ref: source_ref.to_string(),
            context: context.to_string(),
            bytes: Vec::new(),
        }
    }

    fn resolver() -> AccountResolver {
        AccountResolver::new(
            &[
                AccountRule {
                    pattern: r"^.+_\d{8}_.+\.pdf$".to_string(),
                    subject: Some("HDFC".to_string()),
                    account: "HDFC Savings".to_string(),
                },
                AccountRule {
                    pattern: "(?i)amazon".to_string(),
                    subject: None,
                    account: "ICICI Amazon CC".to_string(),
                },
            ],
            &["Cash".to_string(), "HDFC Regalia CC".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_rule_needs_pattern_and_subject() {
        let r = resolver();
        assert_eq!(
            "HDFC Savings",
            r.resolve(&doc("x_12345678_y.pdf", "Your hdfc statement"), None)
        );
        assert_eq!(
            UNKNOWN_ACCOUNT,
            r.resolve(&doc("x_12345678_y.pdf", "Combined statement"), None)
        );
        assert_eq!(
            "ICICI Amazon CC",
            r.resolve(&doc("Amazon-Pay.pdf", ""), Some("Cash"))
        );
    }

    #[test]
    fn test_hint_must_name_a_configured_account() {
        let r = resolver();
        assert_eq!(
            "HDFC Regalia CC",
            r.resolve(&doc("s.pdf", ""), Some(" hdfc regalia cc "))
        );
        assert_eq!(UNKNOWN_ACCOUNT, r.resolve(&doc("s.pdf", ""), Some("Axis")));
        assert_eq!(UNKNOWN_ACCOUNT, r.resolve(&doc("s.pdf", ""), Some("")));
    }

    #[test]
    fn test_bad_pattern_is_an_error() {
        let rule = AccountRule {
            pattern: "(".to_string(),
            subject: None,
            account: "Cash".to_string(),
        };
        assert!(AccountResolver::new(&[rule], &[]).is_err());
    }

    #[test]
    fn test_within_period_keeps_grace_days_and_unknown_dates() {
        let record = |date: &str| {
            Record::from_raw(
                "s.pdf",
                "Cash",
                RawLineItem {
                    date_text: date.to_string(),
                    description: date.to_string(),
                    amount: Amount::from_str("1").unwrap(),
                    direction: Direction::Debit,
                },
            )
        };
        let records = vec![
            record("2025-02-28"),
            record("2025-03-01"),
            record("2025-04-02"),
            record("2025-04-03"),
            record("not a date"),
        ];
        let kept = within_period(records, Period::new(2025, 3).unwrap(), "s.pdf");
        let descriptions: Vec<&str> = kept.iter().map(|r| r.description()).collect();
        assert_eq!(vec!["2025-03-01", "2025-04-02", "not a date"], descriptions);
    }
}
