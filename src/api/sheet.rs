//! Implements the `SheetWriter` trait against Google Sheets. Cell values go through the
//! `sheets::Client`; creating workbooks, adding tabs and setting validation go through the Drive
//! and Sheets REST endpoints directly.

use crate::api::http::{ensure_success, send_with_retry, RetryPolicy};
use crate::api::{SheetWriter, TokenProvider};
use crate::config::Destination;
use crate::error::PipelineError;
use crate::model::{Catalogue, Record};
use crate::{Config, Result};
use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::{json, Value};
use sheets::types::{
    BatchUpdateValuesRequest, DateTimeRenderOption, Dimension, ValueInputOption, ValueRange,
    ValueRenderOption,
};
use sheets::ClientError;
use std::collections::HashMap;
use tracing::{debug, info, trace};

const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const SHEETS_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

pub(super) const CASH: &str = "Cash";
pub(super) const ACHU: &str = "Achu";
pub(super) const FINAL_RECON: &str = "Final Recon";
pub(super) const REPORTING: &str = "Reporting";

/// Tabs that every workbook has, before the per-account ones.
pub(super) const FIXED_TABS: &[&str] = &[CASH, ACHU, FINAL_RECON, REPORTING];

pub(super) const ACCOUNT_HEADER: &[&str] = &[
    "Txn Date",
    "is Expense",
    "Category",
    "Short Description",
    "Description",
    "Cost",
    "Is Split",
    "Appu",
    "Achu",
];

pub(super) const FINAL_RECON_HEADER: &[&str] = &[
    "Source",
    "Category",
    "Appu Expense",
    "Achu Expense",
    "Description",
    "Actual Amount",
    "",
    "Category Heading",
    "Appu",
    "Achu",
    "Actual amount",
];

/// The header row for a tab, if it has one.
pub(super) fn header_for(tab: &str) -> Option<&'static [&'static str]> {
    match tab {
        FINAL_RECON => Some(FINAL_RECON_HEADER),
        REPORTING => None,
        _ => Some(ACCOUNT_HEADER),
    }
}

/// The cells for one record written at 1-based `row`. Columns H and I split the cost between the
/// two partners according to column G. The `Achu` tab tracks money owed to the other partner, so
/// there an unsplit cost belongs to Appu and a fully split one to Achu.
pub(super) fn sheet_row(record: &Record, row: usize, tab: &str) -> Vec<String> {
    let (appu, achu) = if tab == ACHU {
        (
            format!("=IF(G{row}=0, F{row}, IF(G{row}=1, F{row}/2, 0))"),
            format!("=IF(G{row}=1, F{row}/2, IF(G{row}=2, F{row}, 0))"),
        )
    } else {
        (
            format!("=IF(G{row}=0, B{row}*F{row}, IF(G{row}=1, B{row}*F{row}/2, 0))"),
            format!("=IF(G{row}=1, B{row}*F{row}/2, IF(G{row}=2, B{row}*F{row}, 0))"),
        )
    };
    vec![
        record.date().sheet_text(),
        match record.is_expense() {
            Some(true) => "1".to_string(),
            _ => "0".to_string(),
        },
        record
            .category()
            .map(|c| c.name().to_string())
            .unwrap_or_default(),
        String::new(),
        record.description().to_string(),
        record.amount().plain(),
        record
            .is_split()
            .map(|s| s.to_string())
            .unwrap_or_default(),
        appu,
        achu,
    ]
}

/// Quotes a tab name for use in A1 notation.
fn a1(tab: &str, range: &str) -> String {
    format!("'{}'!{range}", tab.replace('\'', "''"))
}

#[derive(Debug, Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetInfo {
    #[serde(default)]
    sheets: Vec<SheetInfo>,
}

#[derive(Debug, Deserialize)]
struct SheetInfo {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

/// Writes to Google Sheets. It takes a `TokenProvider`, on which it calls refresh to keep the token
/// up-to-date.
pub(crate) struct GoogleSheetWriter {
    destination: Destination,
    catalogue: Catalogue,
    token_provider: TokenProvider,
    client: sheets::Client,
    http: reqwest::Client,
    policy: RetryPolicy,
    /// Workbook name -> spreadsheet ID, filled in by `ensure_structure`.
    spreadsheets: HashMap<String, String>,
}

impl GoogleSheetWriter {
    pub(crate) async fn new(config: &Config, mut token_provider: TokenProvider) -> Result<Self> {
        let client = create_sheets_client(&mut token_provider).await?;
        Ok(Self {
            destination: config.destination().clone(),
            catalogue: config.catalogue(),
            token_provider,
            client,
            http: reqwest::Client::new(),
            policy: RetryPolicy::default(),
            spreadsheets: HashMap::new(),
        })
    }

    /// Refreshes the sheets client with a new access token if needed
    async fn refresh_client(&mut self) -> Result<String> {
        self.client = create_sheets_client(&mut self.token_provider).await?;
        Ok(self.token_provider.token().to_string())
    }

    /// Finds the spreadsheet for `target`, creating it in the Drive folder if needed.
    async fn resolve(&mut self, target: &str) -> Result<String> {
        if let Some(id) = self.spreadsheets.get(target) {
            return Ok(id.clone());
        }
        let fixed = self.destination.spreadsheet_id()?.map(str::to_string);
        let id = match (fixed, self.destination.clone()) {
            (Some(id), _) => id,
            (None, Destination::Folder { folder_id }) => {
                self.find_or_create(target, &folder_id).await?
            }
            (None, Destination::Sheet { sheet_url }) => {
                bail!("No spreadsheet ID in '{sheet_url}'")
            }
        };
        self.spreadsheets.insert(target.to_string(), id.clone());
        Ok(id)
    }

    async fn find_or_create(&mut self, name: &str, folder_id: &str) -> Result<String> {
        let token = self.refresh_client().await?;
        let query = format!(
            "name = '{}' and '{}' in parents and mimeType = '{SPREADSHEET_MIME}' and trashed = false",
            name.replace('\'', "\\'"),
            folder_id
        );
        let response = send_with_retry(
            self.http
                .get(DRIVE_FILES_URL)
                .bearer_auth(&token)
                .query(&[("q", query.as_str()), ("fields", "files(id)")]),
            &self.policy,
        )
        .await?;
        let list: DriveFileList = ensure_success(response, "Google Drive search")
            .await?
            .json()
            .await
            .context("Failed to parse Google Drive API response")?;
        if let Some(file) = list.files.into_iter().next() {
            debug!("Found existing workbook '{name}' ({})", file.id);
            return Ok(file.id);
        }

        let response = send_with_retry(
            self.http.post(DRIVE_FILES_URL).bearer_auth(&token).json(&json!({
                "name": name,
                "mimeType": SPREADSHEET_MIME,
                "parents": [folder_id],
            })),
            &self.policy,
        )
        .await?;
        let created: DriveFile = ensure_success(response, "Google Drive create")
            .await?
            .json()
            .await
            .context("Google Drive API response missing 'id' field")?;
        info!("Created workbook '{name}' ({})", created.id);
        Ok(created.id)
    }

    async fn existing_tabs(&mut self, spreadsheet_id: &str) -> Result<HashMap<String, i64>> {
        let token = self.refresh_client().await?;
        let response = send_with_retry(
            self.http
                .get(format!("{SHEETS_URL}/{spreadsheet_id}"))
                .bearer_auth(&token)
                .query(&[("fields", "sheets.properties(sheetId,title)")]),
            &self.policy,
        )
        .await?;
        let info: SpreadsheetInfo = ensure_success(response, "Google Sheets metadata")
            .await?
            .json()
            .await
            .context("Failed to parse the spreadsheet metadata")?;
        Ok(info
            .sheets
            .into_iter()
            .map(|s| (s.properties.title, s.properties.sheet_id))
            .collect())
    }

    async fn batch_update(&mut self, spreadsheet_id: &str, requests: Vec<Value>) -> Result<Value> {
        let token = self.refresh_client().await?;
        let response = send_with_retry(
            self.http
                .post(format!("{SHEETS_URL}/{spreadsheet_id}:batchUpdate"))
                .bearer_auth(&token)
                .json(&json!({ "requests": requests })),
            &self.policy,
        )
        .await?;
        ensure_success(response, "Google Sheets batch update")
            .await?
            .json()
            .await
            .context("Failed to parse the batch update response")
    }

    async fn write_values(
        &mut self,
        spreadsheet_id: &str,
        range: String,
        values: Vec<Vec<String>>,
    ) -> Result<()> {
        self.refresh_client().await?;
        let request = BatchUpdateValuesRequest {
            data: vec![ValueRange {
                major_dimension: Some(Dimension::Rows),
                range,
                values,
            }],
            include_values_in_response: Some(false),
            response_date_time_render_option: None,
            response_value_render_option: None,
            value_input_option: Some(ValueInputOption::UserEntered),
        };
        self.client
            .spreadsheets()
            .values_batch_update(spreadsheet_id, &request)
            .await
            .map_err(map_client_error)
            .context("Failed to write ranges")?;
        Ok(())
    }

    /// Adds missing tabs, writes their headers and sets up dropdown validation.
    async fn set_up(&mut self, target: &str, groups: &[String]) -> Result<()> {
        let spreadsheet_id = self.resolve(target).await?;
        let mut tabs = self.existing_tabs(&spreadsheet_id).await?;

        let wanted: Vec<String> = FIXED_TABS
            .iter()
            .map(|t| t.to_string())
            .chain(groups.iter().cloned())
            .collect();
        let missing: Vec<String> = wanted
            .iter()
            .filter(|t| !tabs.contains_key(t.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            debug!("Workbook '{target}' already has every tab");
            return Ok(());
        }

        let add_requests = missing
            .iter()
            .map(|title| json!({ "addSheet": { "properties": { "title": title } } }))
            .collect();
        let reply = self.batch_update(&spreadsheet_id, add_requests).await?;
        for added in reply["replies"].as_array().into_iter().flatten() {
            let props = &added["addSheet"]["properties"];
            if let (Some(title), Some(id)) = (props["title"].as_str(), props["sheetId"].as_i64()) {
                tabs.insert(title.to_string(), id);
            }
        }

        let mut validation = Vec::new();
        for tab in &missing {
            if let Some(header) = header_for(tab) {
                let row = header.iter().map(|h| h.to_string()).collect();
                self.write_values(&spreadsheet_id, a1(tab, "A1"), vec![row])
                    .await?;
            }
            if header_for(tab) == Some(ACCOUNT_HEADER) {
                if let Some(sheet_id) = tabs.get(tab.as_str()) {
                    validation.extend(validation_requests(*sheet_id, &self.catalogue));
                }
            }
            info!("Added tab '{tab}' to '{target}'");
        }
        if !validation.is_empty() {
            self.batch_update(&spreadsheet_id, validation).await?;
        }
        Ok(())
    }

    async fn append(&mut self, target: &str, group: &str, records: &[Record]) -> Result<()> {
        let spreadsheet_id = self.resolve(target).await?;
        self.refresh_client().await?;
        let existing = self
            .client
            .spreadsheets()
            .values_get(
                &spreadsheet_id,
                &a1(group, "A:I"),
                DateTimeRenderOption::FormattedString,
                Dimension::Rows,
                ValueRenderOption::FormattedValue,
            )
            .await
            .map_err(map_client_error)
            .with_context(|| format!("Failed to fetch {group} sheet data"))?;
        let first_row = existing.body.values.len().max(1) + 1;
        let rows: Vec<Vec<String>> = records
            .iter()
            .enumerate()
            .map(|(i, r)| sheet_row(r, first_row + i, group))
            .collect();
        let last_row = first_row + rows.len() - 1;
        trace!("Writing {group} rows {first_row}..={last_row}");
        self.write_values(
            &spreadsheet_id,
            a1(group, &format!("A{first_row}:I{last_row}")),
            rows,
        )
        .await
    }
}

#[async_trait::async_trait]
impl SheetWriter for GoogleSheetWriter {
    async fn ensure_structure(&mut self, target: &str, groups: &[String]) -> Result<()> {
        self.set_up(target, groups).await.map_err(|e| {
            PipelineError::SheetWriteFailed {
                group: target.to_string(),
                reason: format!("{e:#}"),
            }
            .into()
        })
    }

    async fn append_rows(&mut self, target: &str, group: &str, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.append(target, group, records).await.map_err(|e| {
            PipelineError::SheetWriteFailed {
                group: group.to_string(),
                reason: format!("{e:#}"),
            }
            .into()
        })
    }

    fn describe(&self, target: &str) -> String {
        match &self.destination {
            Destination::Folder { folder_id } => {
                format!("workbook '{target}' in Google Drive folder {folder_id}")
            }
            Destination::Sheet { sheet_url } => format!("workbook {sheet_url}"),
        }
    }
}

/// Dropdowns for the category, is-expense and is-split columns, below the header row.
fn validation_requests(sheet_id: i64, catalogue: &Catalogue) -> Vec<Value> {
    let list = |column: i64, values: Vec<String>| {
        json!({
            "setDataValidation": {
                "range": {
                    "sheetId": sheet_id,
                    "startRowIndex": 1,
                    "startColumnIndex": column,
                    "endColumnIndex": column + 1,
                },
                "rule": {
                    "condition": {
                        "type": "ONE_OF_LIST",
                        "values": values
                            .into_iter()
                            .map(|v| json!({ "userEnteredValue": v }))
                            .collect::<Vec<_>>(),
                    },
                    "showCustomUi": true,
                    "strict": false,
                },
            }
        })
    };
    let strings = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    vec![
        list(1, strings(&["0", "1"])),
        list(2, catalogue.choices()),
        list(6, strings(&["0", "1", "2"])),
    ]
}

/// Creates a new sheets client with a refreshed access token.
async fn create_sheets_client(token_provider: &mut TokenProvider) -> Result<sheets::Client> {
    let access_token = token_provider.token_with_refresh().await?;

    // The sheets crate wants OAuth client details too, but only the access token is used for API
    // calls; refreshing is handled by the TokenProvider.
    Ok(sheets::Client::new(
        String::new(),
        String::new(),
        String::new(),
        access_token.to_string(),
        String::new(),
    ))
}

fn map_client_error(e: ClientError) -> anyhow::Error {
    let error_name = match &e {
        ClientError::HttpError { .. } => "Google Sheets HTTP error",
        ClientError::ReqwestError(_) | ClientError::ReqwestMiddleWareError(_) => {
            "Google Sheets transport error"
        }
        ClientError::SerdeJsonError(_) => "Google Sheets response error",
        _ => "Google Sheets client error",
    };
    anyhow::Error::new(e).context(error_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Amount, Category, Direction, RawLineItem, SplitFlag};
    use std::str::FromStr;

    fn record(date: &str, split: SplitFlag) -> Record {
        Record::from_raw(
            "a.pdf",
            "HDFC Savings",
            RawLineItem {
                date_text: date.to_string(),
                description: "ZOMATO".to_string(),
                amount: Amount::from_str("450.50").unwrap(),
                direction: Direction::Debit,
            },
        )
        .categorized(Category::uncategorized(), true, split)
    }

    #[test]
    fn test_sheet_row_account_tab() {
        let row = sheet_row(&record("2025-03-04", SplitFlag::ToSplit), 7, "HDFC Savings");
        assert_eq!(ACCOUNT_HEADER.len(), row.len());
        assert_eq!("04/03/2025", row[0]);
        assert_eq!("1", row[1]);
        assert_eq!("Uncategorized", row[2]);
        assert_eq!("", row[3]);
        assert_eq!("450.50", row[5]);
        assert_eq!("1", row[6]);
        assert_eq!(
            "=IF(G7=0, B7*F7, IF(G7=1, B7*F7/2, 0))",
            row[7]
        );
    }

    #[test]
    fn test_sheet_row_achu_tab_and_unknown_date() {
        let row = sheet_row(&record("?", SplitFlag::AlreadySplit), 2, ACHU);
        assert_eq!("", row[0]);
        assert_eq!("=IF(G2=1, F2/2, IF(G2=2, F2, 0))", row[8]);
    }

    #[test]
    fn test_a1_quotes_tab_names() {
        assert_eq!("'Final Recon'!A1", a1("Final Recon", "A1"));
        assert_eq!("'Bob''s Card'!A:I", a1("Bob's Card", "A:I"));
    }

    #[test]
    fn test_headers() {
        assert_eq!(Some(FINAL_RECON_HEADER), header_for(FINAL_RECON));
        assert_eq!(None, header_for(REPORTING));
        assert_eq!(Some(ACCOUNT_HEADER), header_for("Unknown Account"));
    }

    #[test]
    fn test_validation_requests() {
        let requests = validation_requests(42, &Catalogue::default());
        assert_eq!(3, requests.len());
        let category = &requests[1]["setDataValidation"];
        assert_eq!(42, category["range"]["sheetId"]);
        assert_eq!(2, category["range"]["startColumnIndex"]);
        let values = category["rule"]["condition"]["values"].as_array().unwrap();
        assert!(values.iter().all(|v| v["userEnteredValue"] != "Uncategorized"));
    }
}
