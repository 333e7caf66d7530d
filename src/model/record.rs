//! The transaction `Record` that flows through every stage, and the raw shapes it is built from and
//! enriched with.

use crate::error::PipelineError;
use crate::model::{Amount, Category, TxnDate};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};

/// The account name used when a statement cannot be matched to a configured account.
pub const UNKNOWN_ACCOUNT: &str = "Unknown Account";

/// Which way money moved on the statement.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Money left the account. Stored as a positive amount.
    #[default]
    Debit,
    /// Money came into the account. Stored as a negative amount.
    Credit,
}

serde_plain::derive_display_from_serialize!(Direction);
serde_plain::derive_fromstr_from_deserialize!(Direction);

/// One line item exactly as the extractor read it off a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLineItem {
    #[serde(default, rename = "date")]
    pub date_text: String,
    pub description: String,
    pub amount: Amount,
    #[serde(default)]
    pub direction: Direction,
}

/// Whether a transaction's cost is shared.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SplitFlag {
    /// Not shared.
    #[default]
    No = 0,
    /// Should be divided between both parties.
    ToSplit = 1,
    /// Belongs entirely to the other party.
    AlreadySplit = 2,
}

impl SplitFlag {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<i64> for SplitFlag {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SplitFlag::No),
            1 => Ok(SplitFlag::ToSplit),
            2 => Ok(SplitFlag::AlreadySplit),
            other => Err(format!("is_split must be 0, 1 or 2, got {other}")),
        }
    }
}

impl Display for SplitFlag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

impl Serialize for SplitFlag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for SplitFlag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let n = i64::deserialize(deserializer)?;
        SplitFlag::try_from(n).map_err(D::Error::custom)
    }
}

/// What the classifier decided about one record. Every field is optional because classifiers are
/// allowed to be unsure; the categorization stage fills in defaults.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// The input index the classifier says this answer is for, when it echoes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "flag_from_int_or_bool")]
    pub is_expense: Option<bool>,
    #[serde(default)]
    pub is_split: Option<i64>,
}

/// Classifiers answer `is_expense` with `0`/`1` as often as with `true`/`false`.
fn flag_from_int_or_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Option::<Flag>::deserialize(deserializer)? {
        None => None,
        Some(Flag::Bool(b)) => Some(b),
        Some(Flag::Int(0)) => Some(false),
        Some(Flag::Int(1)) => Some(true),
        Some(Flag::Int(other)) => {
            return Err(D::Error::custom(format!(
                "is_expense must be 0 or 1, got {other}"
            )))
        }
    })
}

/// The view of a record that is sent to a classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifyInput {
    pub index: usize,
    pub date: String,
    pub description: String,
    pub amount: String,
}

/// Which stage's fields a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStage {
    Extracted,
    Categorized,
}

/// One transaction. Created by extraction, enriched once by categorization, read by upload.
///
/// `description` and `amount` are fixed at extraction. The amount is positive for debits and
/// negative for credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    source_ref: String,
    account: String,
    date: TxnDate,
    description: String,
    amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_expense: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_split: Option<SplitFlag>,
}

impl Record {
    /// Builds an extracted record from a raw line item.
    pub fn from_raw(
        source_ref: impl Into<String>,
        account: impl Into<String>,
        raw: RawLineItem,
    ) -> Self {
        let magnitude = raw.amount.abs();
        let amount = match raw.direction {
            Direction::Debit => magnitude,
            Direction::Credit => Amount::new(-magnitude.value()),
        };
        Self {
            source_ref: source_ref.into(),
            account: account.into(),
            date: TxnDate::parse(&raw.date_text),
            description: raw.description,
            amount,
            category: None,
            is_expense: None,
            is_split: None,
        }
    }

    pub fn source_ref(&self) -> &str {
        &self.source_ref
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn date(&self) -> TxnDate {
        self.date
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn category(&self) -> Option<&Category> {
        self.category.as_ref()
    }

    pub fn is_expense(&self) -> Option<bool> {
        self.is_expense
    }

    pub fn is_split(&self) -> Option<SplitFlag> {
        self.is_split
    }

    pub fn stage(&self) -> RecordStage {
        if self.category.is_some() && self.is_expense.is_some() && self.is_split.is_some() {
            RecordStage::Categorized
        } else {
            RecordStage::Extracted
        }
    }

    /// The classifier's view of this record.
    pub fn classify_input(&self, index: usize) -> ClassifyInput {
        ClassifyInput {
            index,
            date: self.date.to_string(),
            description: self.description.clone(),
            amount: self.amount.plain(),
        }
    }

    /// Returns a categorized copy of this record. Only the categorization fields change.
    pub fn categorized(&self, category: Category, is_expense: bool, is_split: SplitFlag) -> Self {
        Self {
            category: Some(category),
            is_expense: Some(is_expense),
            is_split: Some(is_split),
            ..self.clone()
        }
    }

    /// Checks that every categorization field is present and usable.
    pub(crate) fn check_categorized(&self) -> std::result::Result<(), String> {
        match &self.category {
            None => return Err("category is missing".into()),
            Some(c) if c.is_empty() => return Err("category is empty".into()),
            Some(_) => {}
        }
        if self.is_expense.is_none() {
            return Err("is_expense is missing".into());
        }
        if self.is_split.is_none() {
            return Err("is_split is missing".into());
        }
        Ok(())
    }

    /// The pre-flight check run before anything is written to a sheet.
    pub fn validate_for_upload(&self, index: usize) -> crate::Result<()> {
        self.check_categorized()
            .map_err(|reason| PipelineError::RecordIncomplete { index, reason }.into())
    }
}
