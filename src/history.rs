// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Search, filter and sort over a list of past analyses

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::Analysis;
use crate::RadioError;

/// Which diagnoses to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosisFilter {
    #[default]
    All,
    Fracture,
    NoFracture,
}

/// Ordering by processed time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    #[default]
    DateDesc,
    DateAsc,
}

impl FromStr for DiagnosisFilter {
    type Err = RadioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "fracture" => Ok(Self::Fracture),
            "no-fracture" => Ok(Self::NoFracture),
            other => Err(RadioError::Validation(format!(
                "Unknown filter '{}' (expected all, fracture or no-fracture)",
                other
            ))),
        }
    }
}

impl fmt::Display for DiagnosisFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Fracture => "fracture",
            Self::NoFracture => "no-fracture",
        })
    }
}

impl FromStr for SortOrder {
    type Err = RadioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "date-desc" => Ok(Self::DateDesc),
            "date-asc" => Ok(Self::DateAsc),
            other => Err(RadioError::Validation(format!(
                "Unknown sort '{}' (expected date-desc or date-asc)",
                other
            ))),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DateDesc => "date-desc",
            Self::DateAsc => "date-asc",
        })
    }
}

/// A history view: text search, diagnosis filter, sort
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub search: String,
    pub filter: DiagnosisFilter,
    pub sort: SortOrder,
}

impl HistoryQuery {
    /// Case-insensitive substring match over filename, patient name,
    /// patient id and fracture type
    pub fn matches_search(&self, analysis: &Analysis) -> bool {
        let needle = self.search.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        let contains = |field: Option<&str>| field.is_some_and(|v| v.to_lowercase().contains(&needle));

        contains(Some(&analysis.original_filename))
            || contains(analysis.patient_name.as_deref())
            || contains(analysis.patient_id.as_deref())
            || contains(analysis.fracture_type.as_deref())
    }

    pub fn matches_filter(&self, analysis: &Analysis) -> bool {
        match self.filter {
            DiagnosisFilter::All => true,
            DiagnosisFilter::Fracture => analysis.has_fracture(),
            DiagnosisFilter::NoFracture => !analysis.has_fracture(),
        }
    }

    /// Filtered and sorted copy. Ties keep their input order.
    pub fn apply(&self, analyses: &[Analysis]) -> Vec<Analysis> {
        let mut kept: Vec<Analysis> = analyses
            .iter()
            .filter(|a| self.matches_search(a) && self.matches_filter(a))
            .cloned()
            .collect();

        match self.sort {
            SortOrder::DateDesc => kept.sort_by(|a, b| b.processed_date.cmp(&a.processed_date)),
            SortOrder::DateAsc => kept.sort_by(|a, b| a.processed_date.cmp(&b.processed_date)),
        }
        kept
    }

    /// True when the user narrowed the list, used to pick the empty-state hint
    pub fn is_narrowed(&self) -> bool {
        !self.search.trim().is_empty() || self.filter != DiagnosisFilter::All
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn analysis(id: &str, filename: &str, patient: Option<&str>, fracture: Option<&str>, hours: i64) -> Analysis {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + Duration::hours(hours);
        Analysis {
            id: id.into(),
            user_id: "doc".into(),
            patient_id: Some(format!("P-{}", id)),
            patient_name: patient.map(String::from),
            image_url: String::new(),
            annotated_image_url: String::new(),
            original_filename: filename.into(),
            upload_date: at,
            processed_date: at,
            fracture_type: fracture.map(String::from),
            fracture_location: None,
            recovery_time_days: None,
            confidence: 0.5,
            notes: String::new(),
            suspected_fracture: false,
            annotations: None,
        }
    }

    fn sample() -> Vec<Analysis> {
        vec![
            analysis("1", "Wrist_XRay.jpg", Some("Alex Johnson"), Some("Distal radius fracture"), 0),
            analysis("2", "ankle.png", Some("Maria Garcia"), None, 2),
            analysis("3", "hand.png", None, Some("fingers positive"), 1),
        ]
    }

    fn ids(list: &[Analysis]) -> Vec<&str> {
        list.iter().map(|a| a.id.as_str()).collect()
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let query = HistoryQuery { search: "WRIST".into(), ..Default::default() };
        assert_eq!(ids(&query.apply(&sample())), vec!["1"]);

        let query = HistoryQuery { search: "garcia".into(), ..Default::default() };
        assert_eq!(ids(&query.apply(&sample())), vec!["2"]);

        let query = HistoryQuery { search: "p-3".into(), ..Default::default() };
        assert_eq!(ids(&query.apply(&sample())), vec!["3"]);
    }

    #[test]
    fn test_search_matches_fracture_type() {
        let query = HistoryQuery { search: "radius".into(), ..Default::default() };
        assert_eq!(ids(&query.apply(&sample())), vec!["1"]);
    }

    #[test]
    fn test_empty_search_keeps_all_newest_first() {
        let result = HistoryQuery::default().apply(&sample());
        assert_eq!(ids(&result), vec!["2", "3", "1"]);
    }

    #[test]
    fn test_filters() {
        let fracture = HistoryQuery { filter: DiagnosisFilter::Fracture, ..Default::default() };
        assert_eq!(ids(&fracture.apply(&sample())), vec!["3", "1"]);

        let clear = HistoryQuery { filter: DiagnosisFilter::NoFracture, ..Default::default() };
        assert_eq!(ids(&clear.apply(&sample())), vec!["2"]);
    }

    #[test]
    fn test_ascending_and_stable_ties() {
        let mut list = sample();
        list.push(analysis("4", "tie.png", None, None, 1));

        let asc = HistoryQuery { sort: SortOrder::DateAsc, ..Default::default() };
        assert_eq!(ids(&asc.apply(&list)), vec!["1", "3", "4", "2"]);

        let desc = HistoryQuery::default();
        assert_eq!(ids(&desc.apply(&list)), vec!["2", "3", "4", "1"]);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("no-fracture".parse::<DiagnosisFilter>().unwrap(), DiagnosisFilter::NoFracture);
        assert_eq!(SortOrder::DateAsc.to_string(), "date-asc");
        assert!("newest".parse::<SortOrder>().is_err());
    }

    #[test]
    fn test_is_narrowed() {
        assert!(!HistoryQuery::default().is_narrowed());
        assert!(HistoryQuery { search: "x".into(), ..Default::default() }.is_narrowed());
    }
}
