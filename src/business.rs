// Business logic layer - cleans up and joins the scraped data
use crate::models::{ExtractionMismatch, GradeRecord, MobileGrade};

use chrono::Local;

/// Collapse the whitespace noise of a scraped cell into single spaces.
///
/// Splits on ASCII whitespace, trims every token and drops the empty ones,
/// so newlines and tabs left over from the markup turn into single spaces.
pub fn normalize(raw: &str) -> String {
    raw.split(|c: char| c.is_ascii_whitespace())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Keep only the text before the first space.
///
/// The mobile grid prints averages as "93.5 A", we only want "93.5".
pub fn first_word(text: &str) -> String {
    text.split(' ').next().unwrap_or_default().to_string()
}

/// Copy the mobile averages onto the desktop records.
///
/// The desktop list is authoritative for which classes exist, the mobile
/// grid for the average. Classes are matched on the exact `class` text;
/// unmatched mobile rows are ignored. A desktop class without a mobile row
/// keeps its desktop value and is reported back instead of being guessed.
pub fn merge_mobile_averages(desktop: &mut [GradeRecord], mobile: &[MobileGrade]) -> Vec<ExtractionMismatch> {
    let mut mismatches = Vec::new();

    for (row, record) in desktop.iter_mut().enumerate() {
        match mobile.iter().find(|m| m.class == record.class) {
            Some(mobile_class) => record.average = mobile_class.average.clone(),
            None => mismatches.push(ExtractionMismatch { class: record.class.clone(), row }),
        }
    }

    mismatches
}

/// How many classes the assignments walk visits.
///
/// The portal walk has always stopped one class short of the grade list.
/// Whether the trailing class is a real class or an empty filler row is not
/// known, so the skip is kept behind a switch.
pub fn assignment_class_count(class_count: usize, skip_last_class: bool) -> usize {
    if skip_last_class {
        class_count.saturating_sub(1)
    } else {
        class_count
    }
}

/// Current local time, for log lines and timing metadata
pub fn current_time() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desktop(class: &str, average: &str) -> GradeRecord {
        GradeRecord {
            class: class.to_string(),
            average: average.to_string(),
            ..Default::default()
        }
    }

    fn mobile(class: &str, average: &str) -> MobileGrade {
        MobileGrade {
            class: class.to_string(),
            teacher: String::new(),
            average: average.to_string(),
        }
    }

    #[test]
    fn normalize_collapses_markup_noise() {
        assert_eq!(normalize("  AP   Calculus \n  BC  "), "AP Calculus BC");
        assert_eq!(normalize("Room\n101"), "Room 101");
        assert_eq!(normalize("\n\t  \n"), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "",
            " ",
            "plain",
            "  two   words ",
            "line\n   break",
            "\ttabbed\t cell \n",
            "a  b  c  d",
            "   No matching records   ",
        ];

        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", sample);
            assert!(!once.contains("  "));
            assert_eq!(once.trim(), once);
        }
    }

    #[test]
    fn first_word_strips_annotations() {
        assert_eq!(first_word("93.5 A"), "93.5");
        assert_eq!(first_word("NG"), "NG");
        assert_eq!(first_word(""), "");
    }

    #[test]
    fn mobile_average_overwrites_desktop() {
        let mut records = vec![desktop("Math", "70")];
        let mismatches = merge_mobile_averages(&mut records, &[mobile("Math", "85")]);

        assert!(mismatches.is_empty());
        assert_eq!(records[0].average, "85");
    }

    #[test]
    fn missing_mobile_class_is_reported() {
        let mut records = vec![desktop("Art", "")];
        let mismatches = merge_mobile_averages(&mut records, &[mobile("Math", "90")]);

        assert_eq!(mismatches, vec![ExtractionMismatch { class: "Art".to_string(), row: 0 }]);
        // nothing invented
        assert_eq!(records[0].average, "");
    }

    #[test]
    fn class_match_is_case_sensitive() {
        let mut records = vec![desktop("Math", "70")];
        let mismatches = merge_mobile_averages(&mut records, &[mobile("MATH", "85")]);

        assert_eq!(mismatches.len(), 1);
        assert_eq!(records[0].average, "70");
    }

    #[test]
    fn assignment_walk_stops_one_short() {
        assert_eq!(assignment_class_count(6, true), 5);
        assert_eq!(assignment_class_count(0, true), 0);
        assert_eq!(assignment_class_count(6, false), 6);
    }
}
