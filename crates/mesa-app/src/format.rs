// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

//! Spanish (es-ES) cell formatting shared by the grid and the exporters.

use serde_json::Value;
use time::macros::format_description;
use time::{Date, Time};

use crate::model::{Column, ColumnType};

pub const CURRENCY_SUFFIX: &str = " €";
pub const MISSING_IMAGE_LABEL: &str = "Sin imagen";
const DEFAULT_MAX_FRACTION_DIGITS: u8 = 3;

/// Reads a number from a JSON cell. Strings are cleaned of anything but
/// digits, signs and separators, with `,` accepted as decimal separator.
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let cleaned: String = text
                .trim()
                .chars()
                .filter(|ch| ch.is_ascii_digit() || matches!(*ch, '.' | ',' | '-'))
                .collect();
            if cleaned.is_empty() {
                return None;
            }
            cleaned.replacen(',', ".", 1).parse::<f64>().ok()
        }
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// `1234567.891` with 2 places and grouping → `1.234.567,89`.
pub fn format_number(value: f64, decimal_places: u8, use_grouping: bool) -> String {
    let negative = value < 0.0;
    let factor = 10_f64.powi(i32::from(decimal_places));
    let scaled = (value.abs() * factor).round();
    let integer = (scaled / factor).trunc() as u64;
    let fraction = (scaled - (integer as f64) * factor).round() as u64;

    let mut out = String::new();
    if negative && scaled > 0.0 {
        out.push('-');
    }
    let digits = integer.to_string();
    if use_grouping {
        out.push_str(&group_thousands(&digits));
    } else {
        out.push_str(&digits);
    }
    if decimal_places > 0 {
        out.push(',');
        out.push_str(&format!(
            "{fraction:0width$}",
            width = usize::from(decimal_places)
        ));
    }
    out
}

/// Like [`format_number`] but drops trailing zero decimals, keeping at most
/// `max_fraction_digits`.
pub fn format_number_trimmed(value: f64, max_fraction_digits: u8, use_grouping: bool) -> String {
    let full = format_number(value, max_fraction_digits, use_grouping);
    match full.split_once(',') {
        Some((integer, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                integer.to_owned()
            } else {
                format!("{integer},{fraction}")
            }
        }
        None => full,
    }
}

pub fn format_currency(value: f64, use_grouping: bool) -> String {
    format!("{}{CURRENCY_SUFFIX}", format_number(value, 2, use_grouping))
}

pub const fn format_boolean(value: bool) -> &'static str {
    if value { "Sí" } else { "No" }
}

/// `2024-03-05` → `05/03/24`; `2024-03-05T14:07:00Z` → `05/03/24 14:07`.
///
/// The wall-clock time in the source is kept as written; no time zone
/// conversion happens.
pub fn format_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let date = Date::parse(
        raw.get(..10)?,
        format_description!("[year]-[month]-[day]"),
    )
    .ok()?;
    let day_part = format!(
        "{:02}/{:02}/{:02}",
        date.day(),
        u8::from(date.month()),
        date.year().rem_euclid(100)
    );

    let has_time = raw.contains('T') || raw.contains(' ');
    if !has_time {
        return Some(day_part);
    }
    let time = raw.get(11..16).and_then(parse_clock).unwrap_or(Time::MIDNIGHT);
    Some(format!(
        "{day_part} {:02}:{:02}",
        time.hour(),
        time.minute()
    ))
}

fn parse_clock(clock: &str) -> Option<Time> {
    let (hour, minute) = clock.split_once(':')?;
    Time::from_hms(hour.parse().ok()?, minute.parse().ok()?, 0).ok()
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|value| value != 0.0),
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "si" | "sí" | "yes"
        ),
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

pub fn plain_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => format_boolean(*flag).to_owned(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

pub fn format_cell(column: &Column, value: Option<&Value>) -> String {
    let value = value.filter(|value| !value.is_null());
    match column.kind {
        ColumnType::Checkbox | ColumnType::Actions => String::new(),
        ColumnType::Image => value
            .map(plain_text)
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| MISSING_IMAGE_LABEL.to_owned()),
        ColumnType::Currency | ColumnType::GoalAmount => value
            .and_then(numeric_value)
            .map(|amount| format_currency(amount, column.groups_digits()))
            .unwrap_or_default(),
        ColumnType::Number => value
            .and_then(numeric_value)
            .map(|number| match column.decimal_places {
                Some(places) => format_number(number, places, column.groups_digits()),
                None => format_number_trimmed(
                    number,
                    DEFAULT_MAX_FRACTION_DIGITS,
                    column.groups_digits(),
                ),
            })
            .unwrap_or_default(),
        ColumnType::Date => value
            .map(plain_text)
            .and_then(|raw| format_date(&raw).or(Some(raw)))
            .unwrap_or_default(),
        ColumnType::Boolean => format_boolean(value.is_some_and(truthy)).to_owned(),
        ColumnType::Text | ColumnType::GoalStatus => value.map(plain_text).unwrap_or_default(),
    }
}

/// Footer total text: currency columns get the euro suffix, numbers use the
/// column's decimal places (0 when unset).
pub fn format_total(column: &Column, total: f64) -> String {
    match column.kind {
        ColumnType::Currency | ColumnType::GoalAmount => {
            format_currency(total, column.groups_digits())
        }
        _ => format_number(
            total,
            column.decimal_places.unwrap_or(0),
            column.groups_digits(),
        ),
    }
}

/// es-ES only groups from five integer digits up: `1234`, `12.345`.
fn group_thousands(digits: &str) -> String {
    if digits.len() < 5 {
        return digits.to_owned();
    }
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::{
        format_boolean, format_cell, format_currency, format_date, format_number,
        format_number_trimmed, format_total, numeric_value,
    };
    use crate::{Column, ColumnType};
    use serde_json::json;

    #[test]
    fn currency_uses_spanish_separators() {
        assert_eq!(format_currency(1234.56, true), "1234,56 €");
        assert_eq!(format_currency(12345.6, true), "12.345,60 €");
        assert_eq!(format_currency(-0.5, true), "-0,50 €");
        assert_eq!(format_currency(1234567.0, false), "1234567,00 €");
        assert_eq!(format_currency(0.0, true), "0,00 €");
    }

    #[test]
    fn numbers_group_thousands_with_dots() {
        assert_eq!(format_number(1234567.0, 0, true), "1.234.567");
        assert_eq!(format_number(999.0, 0, true), "999");
        assert_eq!(format_number(12.346, 2, true), "12,35");
        assert_eq!(format_number(-1000.0, 1, true), "-1000,0");
        assert_eq!(format_number(-10000.0, 1, true), "-10.000,0");
        assert_eq!(format_number_trimmed(2.5, 3, true), "2,5");
        assert_eq!(format_number_trimmed(1000.0, 3, true), "1000");
        assert_eq!(format_number_trimmed(25000.0, 3, true), "25.000");
    }

    #[test]
    fn rounding_carries_into_integer_part() {
        assert_eq!(format_number(0.999, 2, true), "1,00");
        assert_eq!(format_number(-0.001, 2, true), "0,00");
    }

    #[test]
    fn dates_render_short_year_and_optional_time() {
        assert_eq!(format_date("2024-03-05").as_deref(), Some("05/03/24"));
        assert_eq!(
            format_date("2024-03-05T14:07:00Z").as_deref(),
            Some("05/03/24 14:07")
        );
        assert_eq!(
            format_date("2024-12-31 23:59:59").as_deref(),
            Some("31/12/24 23:59")
        );
        assert_eq!(format_date("not a date"), None);
    }

    #[test]
    fn numeric_value_cleans_strings() {
        assert_eq!(numeric_value(&json!("1500,25")), Some(1500.25));
        assert_eq!(numeric_value(&json!(" 42 € ")), Some(42.0));
        assert_eq!(numeric_value(&json!("")), None);
        assert_eq!(numeric_value(&json!(null)), None);
    }

    #[test]
    fn cells_format_by_column_type() {
        let amount = Column::new("importe", "Importe", ColumnType::Currency);
        assert_eq!(format_cell(&amount, Some(&json!(1234.5))), "1234,50 €");
        assert_eq!(format_cell(&amount, None), "");

        let flag = Column::new("activo", "Activo", ColumnType::Boolean);
        assert_eq!(format_cell(&flag, Some(&json!(true))), "Sí");
        assert_eq!(format_cell(&flag, Some(&json!(null))), "No");
        assert_eq!(format_boolean(false), "No");

        let picture = Column::new("foto", "Foto", ColumnType::Image);
        assert_eq!(format_cell(&picture, None), "Sin imagen");

        let when = Column::new("fecha", "Fecha", ColumnType::Date);
        assert_eq!(format_cell(&when, Some(&json!("2025-01-09"))), "09/01/25");
        assert_eq!(format_cell(&when, Some(&json!("pendiente"))), "pendiente");

        let units = Column::new("unidades", "Unidades", ColumnType::Number).with_decimal_places(1);
        assert_eq!(format_cell(&units, Some(&json!("12"))), "12,0");

        let name = Column::new("nombre", "Nombre", ColumnType::Text);
        assert_eq!(format_cell(&name, Some(&json!(17))), "17");
    }

    #[test]
    fn totals_follow_column_type() {
        let amount = Column::new("importe", "Importe", ColumnType::Currency);
        assert_eq!(format_total(&amount, 25000.0), "25.000,00 €");
        let units = Column::new("unidades", "Unidades", ColumnType::Number);
        assert_eq!(format_total(&units, 2500.0), "2500");
    }
}
