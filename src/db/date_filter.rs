//! Date filter expressions accepted on read paths
//!
//! - `2024-03-01` single day
//! - `2024-03-01:2024-03-07` inclusive range
//! - `include:2024-03-01,2024-03-04` explicit days
//! - `exclude:2024-03-02` everything but these days

use crate::error::{AltwatchError, Result};
use crate::parser::LOG_DATE_FORMAT;
use chrono::NaiveDate;
use rusqlite::types::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateFilter {
    Single(NaiveDate),
    Range(NaiveDate, NaiveDate),
    Include(Vec<NaiveDate>),
    Exclude(Vec<NaiveDate>),
}

fn parse_date(s: &str, expr: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), LOG_DATE_FORMAT)
        .map_err(|_| AltwatchError::InvalidDateFilter(expr.to_string()))
}

fn parse_list(list: &str, expr: &str) -> Result<Vec<NaiveDate>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_date(s, expr))
        .collect()
}

impl DateFilter {
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if let Some(list) = expr.strip_prefix("include:") {
            return Ok(DateFilter::Include(parse_list(list, expr)?));
        }
        if let Some(list) = expr.strip_prefix("exclude:") {
            return Ok(DateFilter::Exclude(parse_list(list, expr)?));
        }
        if let Some((start, end)) = expr.split_once(':') {
            let start = parse_date(start, expr)?;
            let end = parse_date(end, expr)?;
            if start > end {
                return Err(AltwatchError::InvalidDateFilter(expr.to_string()));
            }
            return Ok(DateFilter::Range(start, end));
        }
        Ok(DateFilter::Single(parse_date(expr, expr)?))
    }

    /// SQL predicate on `log_date` plus its parameters, appended after other
    /// positional parameters.
    pub fn sql_clause(&self) -> (String, Vec<Value>) {
        let fmt = |d: &NaiveDate| Value::Text(d.format(LOG_DATE_FORMAT).to_string());
        match self {
            DateFilter::Single(d) => ("log_date = ?".to_string(), vec![fmt(d)]),
            DateFilter::Range(a, b) => ("log_date BETWEEN ? AND ?".to_string(), vec![fmt(a), fmt(b)]),
            DateFilter::Include(days) if days.is_empty() => ("0".to_string(), vec![]),
            DateFilter::Exclude(days) if days.is_empty() => ("1".to_string(), vec![]),
            DateFilter::Include(days) => (
                format!("log_date IN ({})", placeholders(days.len())),
                days.iter().map(fmt).collect(),
            ),
            DateFilter::Exclude(days) => (
                format!("log_date NOT IN ({})", placeholders(days.len())),
                days.iter().map(fmt).collect(),
            ),
        }
    }

    pub fn matches(&self, date: NaiveDate) -> bool {
        match self {
            DateFilter::Single(d) => *d == date,
            DateFilter::Range(a, b) => *a <= date && date <= *b,
            DateFilter::Include(days) => days.contains(&date),
            DateFilter::Exclude(days) => !days.contains(&date),
        }
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
