//! Extractors: turn one statement document into raw line items.

use crate::api::{ChatClient, Document, Extract, ExtractedStatement};
use crate::Result;
use anyhow::{anyhow, bail, Context};
use tracing::debug;

const EXTRACT_INSTRUCTIONS: &str = r#"You read the text of one bank or credit card statement and list every transaction on it.

Reply with only a JSON object, no prose and no code fence, shaped like this:
{
  "account": "<one of the known accounts, or null if none fits>",
  "items": [
    { "date": "<date exactly as printed>", "description": "<description exactly as printed>",
      "amount": "<amount as printed, without sign>", "direction": "debit" | "credit" }
  ]
}

Rules:
- Money leaving the account (purchases, withdrawals, fees) is "debit". Money coming in (salary,
  refunds, payments received, reversals) is "credit".
- Copy descriptions verbatim. Do not summarise or correct them.
- Skip opening and closing balances, totals and reward point summaries.
- Keep the order in which transactions appear on the statement."#;

/// Reads the PDF text layer and asks the language model to pick out the transactions.
pub(crate) struct PdfExtractor {
    llm: ChatClient,
    accounts: Vec<String>,
}

impl PdfExtractor {
    pub(crate) fn new(llm: ChatClient, accounts: &[String]) -> Self {
        Self {
            llm,
            accounts: accounts.to_vec(),
        }
    }

    fn instructions(&self) -> String {
        format!(
            "{EXTRACT_INSTRUCTIONS}\n\nKnown accounts:\n{}",
            self.accounts.join("\n")
        )
    }
}

#[async_trait::async_trait]
impl Extract for PdfExtractor {
    async fn extract(&self, document: &Document) -> Result<ExtractedStatement> {
        let text = pdf_text(document.bytes.clone()).await?;
        if text.trim().is_empty() {
            bail!("The PDF has no text layer, it may be scanned or password protected");
        }
        debug!(
            "Read {} characters of text from '{}'",
            text.len(),
            document.source_ref
        );
        let prompt = format!(
            "File name: {}\nEmail subject: {}\n\nStatement text:\n{}",
            document.source_ref, document.context, text
        );
        self.llm
            .complete_json(&self.instructions(), &prompt)
            .await
            .context("The language model could not extract the statement")
    }
}

/// `pdf-extract` is synchronous and panics on some malformed files, so it runs on a blocking
/// thread where a panic surfaces as a join error.
async fn pdf_text(bytes: Vec<u8>) -> Result<String> {
    tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| anyhow!("PDF text extraction crashed: {e}"))?
        .map_err(|e| anyhow!("Unable to read the PDF: {e}"))
}

/// Treats the document bytes as an already-extracted statement in the same JSON shape the
/// language model produces. Used with the local inbox.
pub(crate) struct JsonExtractor;

#[async_trait::async_trait]
impl Extract for JsonExtractor {
    async fn extract(&self, document: &Document) -> Result<ExtractedStatement> {
        serde_json::from_slice(&document.bytes)
            .with_context(|| format!("'{}' is not a statement JSON file", document.source_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Direction;

    fn doc(bytes: &[u8]) -> Document {
        Document {
            source_ref: "hdfc.json".to_string(),
            context: String::new(),
            bytes: bytes.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_json_extractor() {
        let statement = JsonExtractor
            .extract(&doc(
                br#"{
                    "account": "HDFC Savings",
                    "items": [
                        {"date": "01/03/2025", "description": "UPI-SWIGGY", "amount": "350.00"},
                        {"date": "02/03/2025", "description": "NEFT SALARY", "amount": "1,00,000.00", "direction": "credit"}
                    ]
                }"#,
            ))
            .await
            .unwrap();
        assert_eq!(Some("HDFC Savings"), statement.account.as_deref());
        assert_eq!(2, statement.items.len());
        assert_eq!(Direction::Debit, statement.items[0].direction);
        assert_eq!(Direction::Credit, statement.items[1].direction);
    }

    #[tokio::test]
    async fn test_json_extractor_rejects_garbage() {
        let err = JsonExtractor.extract(&doc(b"%PDF-1.4")).await.unwrap_err();
        assert!(err.to_string().contains("hdfc.json"));
    }

    #[tokio::test]
    async fn test_pdf_text_rejects_non_pdf() {
        assert!(pdf_text(b"not a pdf".to_vec()).await.is_err());
    }
}
