//! Dated index patterns such as `[logs-]YYYY.MM.DD`
//!
//! Text in square brackets is literal; `YYYY`, `GGGG`, `MM`, `WW`, `DD` and
//! `HH` are date tokens. With an interval set, one index name is produced per
//! interval step overlapping the query time range.

use crate::config::IndexInterval;
use crate::error::EsFramesError;
use crate::model::TimeRange;
use crate::Result;
use chrono::{
    DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc,
};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(String),
    Year,
    IsoYear,
    Month,
    IsoWeek,
    Day,
    Hour,
}

/// An index name or dated index pattern
#[derive(Debug, Clone)]
pub struct IndexPattern {
    pattern: String,
    interval: IndexInterval,
    tokens: Vec<Token>,
}

impl IndexPattern {
    pub fn new(pattern: impl Into<String>, interval: IndexInterval) -> Result<Self> {
        let pattern = pattern.into();
        let tokens = if interval == IndexInterval::None {
            Vec::new()
        } else {
            tokenize(&pattern)?
        };
        Ok(Self {
            pattern,
            interval,
            tokens,
        })
    }

    /// Index names covering `range`.
    pub fn indices(&self, range: &TimeRange) -> Vec<String> {
        if self.interval == IndexInterval::None {
            return self
                .pattern
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        let (Some(from), Some(to)) = (
            DateTime::<Utc>::from_timestamp_millis(range.from),
            DateTime::<Utc>::from_timestamp_millis(range.to),
        ) else {
            return vec![self.format(Utc::now().naive_utc())];
        };

        let mut indices = Vec::new();
        let mut current = self.interval_start(from.naive_utc());
        let end = to.naive_utc();
        while current <= end {
            let name = self.format(current);
            if indices.last() != Some(&name) {
                indices.push(name);
            }
            current = match self.next(current) {
                Some(next) => next,
                None => break,
            };
        }
        indices
    }

    fn interval_start(&self, t: NaiveDateTime) -> NaiveDateTime {
        let date = t.date();
        let midnight = NaiveTime::MIN;
        match self.interval {
            IndexInterval::None => t,
            IndexInterval::Hourly => date.and_hms_opt(t.hour(), 0, 0).unwrap_or(t),
            IndexInterval::Daily => date.and_time(midnight),
            IndexInterval::Weekly => {
                let back = date.weekday().num_days_from_monday() as i64;
                (date - Duration::days(back)).and_time(midnight)
            }
            IndexInterval::Monthly => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .unwrap_or(date)
                .and_time(midnight),
            IndexInterval::Yearly => NaiveDate::from_ymd_opt(date.year(), 1, 1)
                .unwrap_or(date)
                .and_time(midnight),
        }
    }

    fn next(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        match self.interval {
            IndexInterval::None => None,
            IndexInterval::Hourly => Some(t + Duration::hours(1)),
            IndexInterval::Daily => Some(t + Duration::days(1)),
            IndexInterval::Weekly => Some(t + Duration::weeks(1)),
            IndexInterval::Monthly => t.checked_add_months(Months::new(1)),
            IndexInterval::Yearly => t.checked_add_months(Months::new(12)),
        }
    }

    fn format(&self, t: NaiveDateTime) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(s) => out.push_str(s),
                Token::Year => out.push_str(&format!("{:04}", t.year())),
                Token::IsoYear => out.push_str(&format!("{:04}", t.iso_week().year())),
                Token::Month => out.push_str(&format!("{:02}", t.month())),
                Token::IsoWeek => out.push_str(&format!("{:02}", t.iso_week().week())),
                Token::Day => out.push_str(&format!("{:02}", t.day())),
                Token::Hour => out.push_str(&format!("{:02}", t.hour())),
            }
        }
        out
    }
}

fn tokenize(pattern: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = pattern;
    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('[') {
            let end = stripped.find(']').ok_or_else(|| {
                EsFramesError::Config(format!("unterminated '[' in index pattern '{}'", pattern))
            })?;
            tokens.push(Token::Literal(stripped[..end].to_string()));
            rest = &stripped[end + 1..];
            continue;
        }

        let table = [
            ("YYYY", Token::Year),
            ("GGGG", Token::IsoYear),
            ("MM", Token::Month),
            ("WW", Token::IsoWeek),
            ("DD", Token::Day),
            ("HH", Token::Hour),
        ];
        if let Some((text, token)) = table.iter().find(|(text, _)| rest.starts_with(text)) {
            tokens.push(token.clone());
            rest = &rest[text.len()..];
            continue;
        }

        let ch = rest.chars().next().map(char::len_utf8).unwrap_or(1);
        match tokens.last_mut() {
            Some(Token::Literal(s)) => s.push_str(&rest[..ch]),
            _ => tokens.push(Token::Literal(rest[..ch].to_string())),
        }
        rest = &rest[ch..];
    }
    Ok(tokens)
}
