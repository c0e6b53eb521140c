use anyhow::{anyhow, bail};
use chrono::{Datelike, NaiveDate};

/// First month of the school year (August). Months 8..=12 belong to the
/// label's start year, 1..=7 to its end year.
pub const YEAR_START_MONTH: u32 = 8;

/// One month of an academic year, resolved to its calendar year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthSlot {
    pub month: u32,
    pub year: i32,
}

/// Academic-year label covering `today`, e.g. "2025/2026".
pub fn current_label(today: NaiveDate) -> String {
    let y = today.year();
    if today.month() >= YEAR_START_MONTH {
        format!("{}/{}", y, y + 1)
    } else {
        format!("{}/{}", y - 1, y)
    }
}

/// The 12 months an academic-year label spans, in fixed order
/// August..December of the start year, then January..July of the end year.
///
/// Malformed labels (not two `/`-separated integers one year apart) are an
/// error; they are never silently misparsed.
pub fn months_of(label: &str) -> anyhow::Result<Vec<MonthSlot>> {
    let (start, end) = parse_label(label)?;
    let mut out = Vec::with_capacity(12);
    for month in YEAR_START_MONTH..=12 {
        out.push(MonthSlot { month, year: start });
    }
    for month in 1..YEAR_START_MONTH {
        out.push(MonthSlot { month, year: end });
    }
    Ok(out)
}

/// Label of the academic year containing calendar month `month` of `year`.
pub fn label_for_month(month: u32, year: i32) -> anyhow::Result<String> {
    if !(1..=12).contains(&month) {
        bail!("month out of range: {}", month);
    }
    Ok(if month >= YEAR_START_MONTH {
        format!("{}/{}", year, year + 1)
    } else {
        format!("{}/{}", year - 1, year)
    })
}

/// Calendar year of `month` within the labelled academic year.
pub fn calendar_year_of(label: &str, month: u32) -> anyhow::Result<i32> {
    if !(1..=12).contains(&month) {
        bail!("month out of range: {}", month);
    }
    let (start, end) = parse_label(label)?;
    Ok(if month >= YEAR_START_MONTH { start } else { end })
}

fn parse_label(label: &str) -> anyhow::Result<(i32, i32)> {
    let (a, b) = label
        .trim()
        .split_once('/')
        .ok_or_else(|| anyhow!("bad academic year label: {:?}", label))?;
    let start: i32 = a
        .trim()
        .parse()
        .map_err(|_| anyhow!("bad academic year label: {:?}", label))?;
    let end: i32 = b
        .trim()
        .parse()
        .map_err(|_| anyhow!("bad academic year label: {:?}", label))?;
    if end != start + 1 {
        bail!("academic year label must span consecutive years: {:?}", label);
    }
    Ok((start, end))
}
