use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use tracing::warn;

/// The category given to anything the classifier could not decide on.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// The spending categories that ship in a new `config.json`.
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "Achu",
    "Aishu",
    "Amma",
    "Bank",
    "Budget",
    "Car",
    "Cashback",
    "Christmas",
    "Cook",
    "Courier",
    "Dress",
    "Education",
    "Electricity",
    "Entertainment",
    "Faith",
    "Family",
    "Food",
    "Fuel",
    "Gift",
    "Grocery",
    "Gym",
    "Household",
    "Income",
    "Income Tax",
    "Insurance",
    "Interest",
    "International Trip",
    "Internet",
    "Investment",
    "Kitchen",
    "Maid",
    "Medical",
    "Payment",
    "Petrol",
    "Philanthropy",
    "Phone",
    "Processed Transactions",
    "Profession",
    "Refund",
    "Rent",
    "Salary",
    "Sale",
    "Salon",
    "Scooter",
    "Shopping",
    "Software",
    "Subscription",
    "Tax",
    "Transfer",
    "Transportation",
    "Travel",
    UNCATEGORIZED,
    "Value Add",
    "Water",
    "Wedding",
];

/// Misspellings and retired names that classifiers still produce, mapped to the category that
/// replaced them.
pub const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("Entertaintment", "Entertainment"),
    ("Body", "Gym"),
    ("House", "Household"),
];

/// A spending category name. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    pub fn uncategorized() -> Self {
        Self(UNCATEGORIZED.to_string())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn is_uncategorized(&self) -> bool {
        self.0 == UNCATEGORIZED
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The set of categories a record may end up in, plus aliases for names that should be folded into
/// one of them.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Catalogue {
    /// normalized key -> canonical name
    names: BTreeMap<String, String>,
    /// normalized alias -> canonical name
    aliases: BTreeMap<String, String>,
}

impl Default for Catalogue {
    fn default() -> Self {
        Self::new(
            DEFAULT_CATEGORIES.iter().copied(),
            DEFAULT_ALIASES.iter().map(|(a, c)| (*a, *c)),
        )
    }
}

impl Catalogue {
    pub fn new<'a>(
        names: impl IntoIterator<Item = &'a str>,
        aliases: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut map: BTreeMap<String, String> = names
            .into_iter()
            .map(|n| (key(n), n.trim().to_string()))
            .collect();
        map.insert(key(UNCATEGORIZED), UNCATEGORIZED.to_string());
        let aliases = aliases
            .into_iter()
            .map(|(alias, canonical)| (key(alias), canonical.trim().to_string()))
            .collect();
        Self {
            names: map,
            aliases,
        }
    }

    /// Maps whatever the classifier said onto a catalogue category. Blank or missing input becomes
    /// `Uncategorized`, as does anything unrecognized.
    pub fn normalize(&self, raw: Option<&str>) -> Category {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Category::uncategorized();
        };
        let k = key(raw);
        if let Some(canonical) = self.aliases.get(&k) {
            if let Some(name) = self.names.get(&key(canonical)) {
                return Category(name.clone());
            }
        }
        if let Some(name) = self.names.get(&k) {
            return Category(name.clone());
        }
        warn!("Unknown category '{raw}', using {UNCATEGORIZED}");
        Category::uncategorized()
    }

    /// Category names in sorted order, without `Uncategorized`. These are the choices offered in
    /// spreadsheet dropdowns.
    pub fn choices(&self) -> Vec<String> {
        let mut v: Vec<String> = self
            .names
            .values()
            .filter(|n| n.as_str() != UNCATEGORIZED)
            .cloned()
            .collect();
        v.sort();
        v
    }

    /// All category names, including `Uncategorized`.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.values().map(String::as_str)
    }
}

/// `Income Tax`, `income_tax` and ` INCOME TAX ` all compare equal.
fn key(s: &str) -> String {
    s.trim().to_uppercase().replace(' ', "_")
}
