//! Classifiers: decide category, expense flag and split flag for a batch of records.

use crate::api::{ChatClient, Classify};
use crate::config::CategoryRule;
use crate::model::{Catalogue, Classification, ClassifyInput, UNCATEGORIZED};
use crate::Result;
use anyhow::Context;

const CLASSIFY_INSTRUCTIONS: &str = r#"You categorize household bank transactions for a monthly budget.

You receive a JSON array of transactions, each with "index", "date", "description" and "amount".
A positive amount is money spent, a negative amount is money received.

Reply with only a JSON array, no prose and no code fence. It must have exactly one element per
input transaction, in the same order, shaped like this:
{ "index": <input index>, "category": "<one of the valid categories>", "is_expense": 0 | 1, "is_split": 0 | 1 | 2 }

- "is_expense" is 1 when money left the account and 0 when it came in.
- "is_split" is 1 when the cost is shared between the two partners, 2 when it belongs entirely to
  the other partner, and 0 otherwise.
- Use "Uncategorized" when no category fits. Never invent a category."#;

/// Asks the language model to classify a batch in one request.
pub(crate) struct LlmClassifier {
    llm: ChatClient,
    catalogue: Catalogue,
}

impl LlmClassifier {
    pub(crate) fn new(llm: ChatClient, catalogue: Catalogue) -> Self {
        Self { llm, catalogue }
    }

    fn instructions(&self) -> String {
        let mut categories = self.catalogue.choices();
        categories.push(UNCATEGORIZED.to_string());
        format!(
            "{CLASSIFY_INSTRUCTIONS}\n\nValid categories:\n{}",
            categories.join("\n")
        )
    }
}

#[async_trait::async_trait]
impl Classify for LlmClassifier {
    async fn classify(&self, batch: &[ClassifyInput]) -> Result<Vec<Classification>> {
        let input = serde_json::to_string_pretty(batch).context("Unable to serialize the batch")?;
        self.llm.complete_json(&self.instructions(), &input).await
    }
}

/// Keyword rules from the config. The first rule whose keyword appears in the description wins;
/// anything unmatched is left for the categorization stage to default.
pub(crate) struct RuleClassifier {
    rules: Vec<(String, CategoryRule)>,
}

impl RuleClassifier {
    pub(crate) fn new(rules: &[CategoryRule]) -> Self {
        Self {
            rules: rules
                .iter()
                .filter(|r| !r.keyword.trim().is_empty())
                .map(|r| (r.keyword.trim().to_lowercase(), r.clone()))
                .collect(),
        }
    }

    fn classify_one(&self, input: &ClassifyInput) -> Classification {
        let description = input.description.to_lowercase();
        let matched = self
            .rules
            .iter()
            .find(|(keyword, _)| description.contains(keyword.as_str()))
            .map(|(_, rule)| Classification {
                category: Some(rule.category.clone()),
                is_expense: rule.is_expense,
                is_split: rule.is_split.map(i64::from),
                ..Classification::default()
            })
            .unwrap_or_default();
        Classification {
            index: Some(input.index),
            ..matched
        }
    }
}

#[async_trait::async_trait]
impl Classify for RuleClassifier {
    async fn classify(&self, batch: &[ClassifyInput]) -> Result<Vec<Classification>> {
        Ok(batch.iter().map(|input| self.classify_one(input)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(index: usize, description: &str) -> ClassifyInput {
        ClassifyInput {
            index,
            date: "2025-03-01".to_string(),
            description: description.to_string(),
            amount: "100.00".to_string(),
        }
    }

    fn rule(keyword: &str, category: &str) -> CategoryRule {
        CategoryRule {
            keyword: keyword.to_string(),
            category: category.to_string(),
            is_expense: None,
            is_split: None,
        }
    }

    #[tokio::test]
    async fn test_rule_classifier_first_match_wins() {
        let mut salary = rule("salary", "Salary");
        salary.is_expense = Some(false);
        let classifier = RuleClassifier::new(&[
            rule("SWIGGY", "Food"),
            rule("swiggy instamart", "Grocery"),
            salary,
        ]);
        let out = classifier
            .classify(&[
                input(0, "UPI-Swiggy Instamart-123"),
                input(1, "NEFT SALARY MARCH"),
                input(2, "ATM WDL"),
            ])
            .await
            .unwrap();
        assert_eq!(3, out.len());
        assert_eq!(Some("Food"), out[0].category.as_deref());
        assert_eq!(Some(false), out[1].is_expense);
        assert_eq!(Classification::default(), out[2]);
    }

    #[tokio::test]
    async fn test_rule_classifier_ignores_blank_keywords() {
        let classifier = RuleClassifier::new(&[rule("  ", "Food")]);
        let out = classifier.classify(&[input(0, "anything")]).await.unwrap();
        assert_eq!(None, out[0].category);
    }

    #[test]
    fn test_llm_instructions_list_categories() {
        let llm = ChatClient::new(&crate::config::LlmSettings::default()).unwrap();
        let classifier = LlmClassifier::new(llm, Catalogue::default());
        let instructions = classifier.instructions();
        assert!(instructions.contains("\nIncome Tax\n"));
        assert!(instructions.ends_with(UNCATEGORIZED));
    }
}
