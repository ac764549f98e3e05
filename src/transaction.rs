use chrono::Utc;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::debug;

/// One parsed spreadsheet row: header text to cell text.
pub type SheetRow = HashMap<String, String>;

static YEAR_MONTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}$").expect("static date pattern"));

const BILL_NO_COLUMNS: &[&str] = &["Bill No", "bill_no"];
const BILL_DATE_COLUMNS: &[&str] = &[
    "Bill Date (YYYY-MM-DD)",
    "Bill Date (YYYY-MM)",
    "Bill Date",
    "bill_date",
];
const AMOUNT_COLUMNS: &[&str] = &["Bill Amount", "bill_amount"];
const MOBILE_COLUMNS: &[&str] = &[
    "Customer Mobile",
    "customer_mobile",
    "Mobile Number",
    "mobile_number",
];
const POINTS_TO_ADD_COLUMNS: &[&str] = &["Points to Add", "points_to_add"];
const POINTS_TO_REDEEM_COLUMNS: &[&str] = &["Points to Redeem", "points_to_redeem"];

/// A spreadsheet row after column resolution, ready for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawTransactionInput {
    pub bill_number: String,
    pub mobile_raw: String,
    pub amount: Decimal,
    pub points_to_add: Option<Decimal>,
    pub points_to_redeem: Decimal,
    /// `YYYY-MM-DD` in the common case; other shapes pass through untouched.
    pub transaction_date: String,
    pub description: String,
}

impl RawTransactionInput {
    pub fn is_valid(&self) -> bool {
        !self.mobile_raw.trim().is_empty() && self.amount > Decimal::ZERO
    }
}

/// Resolves every row and keeps only those with a mobile and a positive amount.
pub fn extract_transactions(rows: &[SheetRow]) -> Vec<RawTransactionInput> {
    let stamp = Utc::now().timestamp_millis();
    let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();

    rows.iter()
        .enumerate()
        .map(|(index, row)| extract_row(row, index, stamp, &today))
        .filter(|tx| {
            let keep = tx.is_valid();
            if !keep {
                debug!(bill_no = %tx.bill_number, "dropping row without mobile or positive amount");
            }
            keep
        })
        .collect()
}

fn extract_row(row: &SheetRow, index: usize, stamp: i64, today: &str) -> RawTransactionInput {
    let bill_number = column(row, BILL_NO_COLUMNS)
        .map(str::to_string)
        .unwrap_or_else(|| format!("AUTO-{}-{}", stamp, index));

    let transaction_date = normalize_date(column(row, BILL_DATE_COLUMNS), today);
    let amount = column(row, AMOUNT_COLUMNS)
        .map(parse_decimal)
        .unwrap_or(Decimal::ZERO);
    let mobile_raw = column(row, MOBILE_COLUMNS).unwrap_or_default().to_string();
    let points_to_add = column(row, POINTS_TO_ADD_COLUMNS).map(parse_decimal);
    let points_to_redeem = column(row, POINTS_TO_REDEEM_COLUMNS)
        .map(parse_decimal)
        .unwrap_or(Decimal::ZERO);

    RawTransactionInput {
        description: format!("Bill #{} - Upload", bill_number),
        bill_number,
        mobile_raw,
        amount,
        points_to_add,
        points_to_redeem,
        transaction_date,
    }
}

/// First accepted header spelling with a non-blank value wins.
fn column<'a>(row: &'a SheetRow, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| row.get(*name))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
}

fn normalize_date(raw: Option<&str>, today: &str) -> String {
    match raw {
        Some(date) if YEAR_MONTH.is_match(date) => format!("{}-01", date),
        Some(date) => date.to_string(),
        None => today.to_string(),
    }
}

/// Permissive decimal parsing: leading numeric prefix, anything else is zero.
///
/// Values outside the `Decimal` range (about 7.9e28) cannot be represented
/// and also fall back to their prefix or zero.
pub fn parse_decimal(raw: &str) -> Decimal {
    let trimmed = raw.trim();
    if let Ok(value) = Decimal::from_str(trimmed) {
        return value;
    }
    if let Ok(value) = Decimal::from_scientific(trimmed) {
        return value;
    }

    let end = numeric_prefix_len(trimmed);
    let value = Decimal::from_str(&trimmed[..end]).unwrap_or(Decimal::ZERO);
    if !trimmed.is_empty() {
        debug!(raw = trimmed, %value, "numeric cell not fully parsed");
    }
    value
}

fn numeric_prefix_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'-') | Some(b'+')) {
        end = 1;
    }
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => end += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    // a trailing dot is not part of the number
    if end > 0 && bytes[end - 1] == b'.' {
        end -= 1;
    }
    end
}
