//! Transaction dates, which may be unresolved, and the monthly `Period` a run is budgeting for.

use anyhow::{bail, Context};
use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Date formats seen on statements, tried in order.
/// Two-digit year forms come first because `%Y` would happily read `25` as the year 25.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%y",
    "%d/%m/%Y",
    "%d-%b-%y",
    "%d-%b-%Y",
    "%b %d, %Y",
    "%d %b %Y",
];

/// Date-time formats seen on statements; only the date part is kept.
const DATE_TIME_FORMATS: &[&str] = &["%d/%m/%Y %H:%M:%S"];

const UNKNOWN: &str = "Unknown";

/// The date of a transaction. Extraction never fails a line item because of its date, it records
/// `Unknown` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TxnDate {
    Known(NaiveDate),
    #[default]
    Unknown,
}

impl TxnDate {
    /// Parses statement date text using the accepted formats, falling back to `Unknown`.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return TxnDate::Unknown;
        }
        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(text, format) {
                return TxnDate::Known(date);
            }
        }
        for format in DATE_TIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
                return TxnDate::Known(dt.date());
            }
        }
        TxnDate::Unknown
    }

    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            TxnDate::Known(d) => Some(*d),
            TxnDate::Unknown => None,
        }
    }

    /// The DD/MM/YYYY form written to spreadsheet cells, empty when unknown.
    pub fn sheet_text(&self) -> String {
        match self {
            TxnDate::Known(d) => d.format("%d/%m/%Y").to_string(),
            TxnDate::Unknown => String::new(),
        }
    }
}

impl Display for TxnDate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TxnDate::Known(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            TxnDate::Unknown => f.write_str(UNKNOWN),
        }
    }
}

impl Serialize for TxnDate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            TxnDate::Known(d) => serializer.serialize_str(&d.format("%Y-%m-%d").to_string()),
            TxnDate::Unknown => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for TxnDate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        match s {
            None => Ok(TxnDate::Unknown),
            Some(s) if s == UNKNOWN => Ok(TxnDate::Unknown),
            Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map(TxnDate::Known)
                .map_err(|e| serde::de::Error::custom(format!("Invalid date '{s}': {e}"))),
        }
    }
}

/// The calendar month that a run is budgeting for. Written as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    first_day: NaiveDate,
}

impl Period {
    pub fn new(year: i32, month: u32) -> crate::Result<Self> {
        let first_day = NaiveDate::from_ymd_opt(year, month, 1)
            .with_context(|| format!("{year}-{month:02} is not a valid month"))?;
        Ok(Self { first_day })
    }

    /// The month before the one containing `today`.
    pub fn previous_month(today: NaiveDate) -> Self {
        let first_of_this_month = today.with_day(1).unwrap_or(today);
        let first_day = first_of_this_month
            .checked_sub_months(Months::new(1))
            .unwrap_or(first_of_this_month);
        Self { first_day }
    }

    pub fn year(&self) -> i32 {
        self.first_day.year()
    }

    pub fn month(&self) -> u32 {
        self.first_day.month()
    }

    /// The English month name, e.g. `March`.
    pub fn month_name(&self) -> String {
        self.first_day.format("%B").to_string()
    }

    /// The workbook name for this period, e.g. `Accounts-2025-March`.
    pub fn workbook_name(&self) -> String {
        format!("Accounts-{}-{}", self.year(), self.month_name())
    }

    /// Statements often post the last transactions of a month on the first days of the next, so
    /// the window runs from the 1st of the period through the 2nd of the following month.
    pub fn contains_with_grace(&self, date: NaiveDate) -> bool {
        let end = self
            .first_day
            .checked_add_months(Months::new(1))
            .and_then(|d| d.with_day(2));
        match end {
            Some(end) => date >= self.first_day && date <= end,
            None => date >= self.first_day,
        }
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.first_day.format("%Y-%m"))
    }
}

impl FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((y, m)) = s.trim().split_once('-') else {
            bail!("Expected a period like 2025-03, got '{s}'");
        };
        let year: i32 = y.parse().with_context(|| format!("Bad year in '{s}'"))?;
        let month: u32 = m.parse().with_context(|| format!("Bad month in '{s}'"))?;
        Period::new(year, month)
    }
}

serde_plain::derive_serialize_from_display!(Period);
serde_plain::derive_deserialize_from_fromstr!(Period, "a period formatted as YYYY-MM");

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_formats() {
        let expected = TxnDate::Known(ymd(2025, 3, 7));
        assert_eq!(expected, TxnDate::parse("2025-03-07"));
        assert_eq!(expected, TxnDate::parse("07/03/2025"));
        assert_eq!(expected, TxnDate::parse("07-Mar-2025"));
        assert_eq!(expected, TxnDate::parse("Mar 07, 2025"));
        assert_eq!(expected, TxnDate::parse("07-Mar-25"));
        assert_eq!(expected, TxnDate::parse("07 Mar 2025"));
        assert_eq!(expected, TxnDate::parse(" 07/03/2025 14:22:01 "));
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(TxnDate::Unknown, TxnDate::parse(""));
        assert_eq!(TxnDate::Unknown, TxnDate::parse("sometime in March"));
        assert_eq!(TxnDate::Unknown, TxnDate::parse("31/02/2025"));
    }

    #[test]
    fn test_serde() {
        let known = TxnDate::Known(ymd(2024, 12, 31));
        assert_eq!("\"2024-12-31\"", serde_json::to_string(&known).unwrap());
        assert_eq!("null", serde_json::to_string(&TxnDate::Unknown).unwrap());
        let back: TxnDate = serde_json::from_str("null").unwrap();
        assert_eq!(TxnDate::Unknown, back);
        let back: TxnDate = serde_json::from_str("\"2024-12-31\"").unwrap();
        assert_eq!(known, back);
        assert!(serde_json::from_str::<TxnDate>("\"12/31/2024\"").is_err());
    }

    #[test]
    fn test_sheet_text() {
        assert_eq!("05/01/2025", TxnDate::Known(ymd(2025, 1, 5)).sheet_text());
        assert_eq!("", TxnDate::Unknown.sheet_text());
    }

    #[test]
    fn test_previous_month() {
        assert_eq!(
            "2024-12",
            Period::previous_month(ymd(2025, 1, 15)).to_string()
        );
        assert_eq!("2025-02", Period::previous_month(ymd(2025, 3, 31)).to_string());
    }

    #[test]
    fn test_period_parse_and_name() {
        let p: Period = "2025-03".parse().unwrap();
        assert_eq!("Accounts-2025-March", p.workbook_name());
        assert!("2025-13".parse::<Period>().is_err());
        assert!("March".parse::<Period>().is_err());
    }

    #[test]
    fn test_contains_with_grace() {
        let p = Period::new(2025, 2).unwrap();
        assert!(!p.contains_with_grace(ymd(2025, 1, 31)));
        assert!(p.contains_with_grace(ymd(2025, 2, 1)));
        assert!(p.contains_with_grace(ymd(2025, 3, 2)));
        assert!(!p.contains_with_grace(ymd(2025, 3, 3)));
    }

    #[test]
    fn test_period_serde() {
        let p = Period::new(2025, 7).unwrap();
        assert_eq!("\"2025-07\"", serde_json::to_string(&p).unwrap());
        let back: Period = serde_json::from_str("\"2025-07\"").unwrap();
        assert_eq!(p, back);
    }
}
