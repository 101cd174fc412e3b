use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, info, warn};

use super::error::{BankLoadError, MalformedRecordError};
use super::{Label, QuestionRecord};

const REQUIRED_COLUMNS: [&str; 8] = [
    "category", "question", "answer", "choice1", "choice2", "choice3", "choice4", "choice5",
];

/// Every question of the exam, loaded once and shared read-only between chats.
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    records: Vec<QuestionRecord>,
    rejected: Vec<MalformedRecordError>,
}

/// Column positions resolved from the header row.
struct Columns {
    category: usize,
    question: usize,
    answer: usize,
    choices: [usize; 5],
    explanation: Option<usize>,
    time_limit: Option<usize>,
    image: Option<usize>,
    image_url: Option<usize>,
}

impl Columns {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, BankLoadError> {
        let find = |name: &str| {
            headers
                .iter()
                // Spreadsheet exports like to put a BOM in front of the first header
                .map(|h| h.trim_start_matches('\u{feff}').trim())
                .position(|h| h.eq_ignore_ascii_case(name))
        };

        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|name| find(**name).is_none())
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(BankLoadError::MissingColumns(missing));
        }

        let required = |name: &str| {
            find(name).ok_or_else(|| BankLoadError::MissingColumns(vec![name.to_string()]))
        };
        Ok(Self {
            category: required("category")?,
            question: required("question")?,
            answer: required("answer")?,
            choices: [
                required("choice1")?,
                required("choice2")?,
                required("choice3")?,
                required("choice4")?,
                required("choice5")?,
            ],
            explanation: find("explanation"),
            time_limit: find("time_limit"),
            image: find("image"),
            image_url: find("image_url"),
        })
    }
}

fn field<'r>(record: &'r csv::StringRecord, column: usize) -> &'r str {
    record.get(column).map(str::trim).unwrap_or("")
}

fn optional_field(record: &csv::StringRecord, column: Option<usize>) -> Option<String> {
    column
        .map(|c| field(record, c))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Accepts `45` as well as `45.0`, which is what a re-saved spreadsheet produces.
fn parse_time_limit(raw: &str) -> Option<u32> {
    if let Ok(seconds) = raw.parse::<u32>() {
        return Some(seconds).filter(|s| *s > 0);
    }
    let seconds = raw.parse::<f64>().ok()?;
    if seconds.fract() == 0.0 && seconds >= 1.0 && seconds <= u32::MAX as f64 {
        Some(seconds as u32)
    } else {
        None
    }
}

impl QuestionBank {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BankLoadError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| BankLoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let bank = Self::from_reader(file)?;
        info!(
            "Loaded {} questions from {} ({} rejected), categories: {:?}",
            bank.records.len(),
            path.display(),
            bank.rejected.len(),
            bank.categories()
        );
        Ok(bank)
    }

    pub fn from_reader<R: Read>(source: R) -> Result<Self, BankLoadError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(source);

        let columns = Columns::resolve(reader.headers()?)?;

        let mut records = Vec::new();
        let mut rejected = Vec::new();
        for (i, row) in reader.records().enumerate() {
            let row_record = row?;
            // Row 1 is the header
            let row = i + 2;

            let text = field(&row_record, columns.question);
            if text.is_empty() {
                debug!("Skipping row {} without question text", row);
                continue;
            }

            match Self::parse_record(&row_record, &columns, row, text) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("Rejected question: {}", e);
                    rejected.push(e);
                }
            }
        }

        if records.is_empty() {
            return Err(BankLoadError::Empty);
        }
        Ok(Self { records, rejected })
    }

    fn parse_record(
        row_record: &csv::StringRecord,
        columns: &Columns,
        row: usize,
        text: &str,
    ) -> Result<QuestionRecord, MalformedRecordError> {
        let answer = field(row_record, columns.answer);
        let correct = Label::parse(answer).ok_or_else(|| MalformedRecordError::InvalidLabel {
            row,
            answer: answer.to_string(),
        })?;

        let choices = columns.choices.map(|c| field(row_record, c).to_string());
        if choices[correct.index()].is_empty() {
            return Err(MalformedRecordError::EmptyCorrectChoice { row, label: correct });
        }

        let time_limit_seconds = match optional_field(row_record, columns.time_limit) {
            None => None,
            Some(raw) => match parse_time_limit(&raw) {
                Some(seconds) => Some(seconds),
                None => return Err(MalformedRecordError::InvalidTimeLimit { row, value: raw }),
            },
        };

        Ok(QuestionRecord {
            category: field(row_record, columns.category).to_string(),
            text: text.to_string(),
            choices,
            correct,
            explanation: optional_field(row_record, columns.explanation),
            time_limit_seconds,
            image: optional_field(row_record, columns.image)
                .or_else(|| optional_field(row_record, columns.image_url)),
        })
    }

    #[cfg(test)]
    pub fn records(&self) -> &[QuestionRecord] {
        &self.records
    }

    pub fn rejected(&self) -> &[MalformedRecordError] {
        &self.rejected
    }

    /// Distinct categories in the order they first appear in the file.
    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = Vec::new();
        for record in &self.records {
            if !categories.contains(&record.category.as_str()) {
                categories.push(&record.category);
            }
        }
        categories
    }

    pub fn in_category<'a>(
        &'a self,
        category: &str,
    ) -> impl Iterator<Item = &'a QuestionRecord> + 'a {
        let category = category.to_string();
        self.records.iter().filter(move |r| r.category == category)
    }

    pub fn count_in(&self, category: &str) -> usize {
        self.in_category(category).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "category,question,choice1,choice2,choice3,choice4,choice5,answer,\
                          explanation,time_limit,image_url\n";

    fn load(body: &str) -> Result<QuestionBank, BankLoadError> {
        QuestionBank::from_reader(format!("{}{}", HEADER, body).as_bytes())
    }

    #[test]
    fn loads_valid_rows_and_resolves_optional_fields() {
        let bank = load(
            "verbal,Pick the synonym,one,two,three,four,five,B,Two fits,,\n\
             nonverbal,How many?,1,2,3,4,5,e,,30,https://img/1.png\n",
        )
        .unwrap();

        assert_eq!(bank.records().len(), 2);
        let first = &bank.records()[0];
        assert_eq!(first.correct, Label::B);
        assert_eq!(first.correct_text(), "two");
        assert_eq!(first.explanation.as_deref(), Some("Two fits"));
        assert_eq!(first.time_limit_seconds, None);
        assert_eq!(first.image, None);

        let second = &bank.records()[1];
        assert_eq!(second.correct, Label::E);
        assert_eq!(second.explanation, None);
        assert_eq!(second.time_limit_seconds, Some(30));
        assert_eq!(second.image.as_deref(), Some("https://img/1.png"));
        assert_eq!(bank.categories(), vec!["verbal", "nonverbal"]);
    }

    #[test]
    fn missing_columns_are_all_named() {
        let csv = "category,question,choice1,choice2,answer\nverbal,q,a,b,a\n";
        let err = QuestionBank::from_reader(csv.as_bytes()).unwrap_err();
        match err {
            BankLoadError::MissingColumns(columns) => {
                assert_eq!(columns, vec!["choice3", "choice4", "choice5"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn malformed_rows_are_rejected_without_failing_the_load() {
        let bank = load(
            "verbal,Good row,one,two,three,four,five,a,,,\n\
             verbal,Bad label,one,two,three,four,five,z,,,\n\
             verbal,Empty correct choice,one,two,three,four,,E,,,\n\
             verbal,Bad time limit,one,two,three,four,five,c,,soon,\n",
        )
        .unwrap();

        assert_eq!(bank.records().len(), 1);
        assert_eq!(
            bank.rejected(),
            &[
                MalformedRecordError::InvalidLabel { row: 3, answer: "z".to_string() },
                MalformedRecordError::EmptyCorrectChoice { row: 4, label: Label::E },
                MalformedRecordError::InvalidTimeLimit { row: 5, value: "soon".to_string() },
            ]
        );
    }

    #[test]
    fn blank_questions_are_dropped_silently() {
        let bank = load(
            "verbal,,one,two,three,four,five,a,,,\n\
             verbal,  ,one,two,three,four,five,a,,,\n\
             verbal,Kept,one,two,three,four,five,a,,,\n",
        )
        .unwrap();
        assert_eq!(bank.records().len(), 1);
        assert!(bank.rejected().is_empty());
    }

    #[test]
    fn a_bank_without_usable_rows_is_an_error() {
        assert!(matches!(load(""), Err(BankLoadError::Empty)));
        assert!(matches!(
            load("verbal,Bad,one,two,three,four,five,x,,,\n"),
            Err(BankLoadError::Empty)
        ));
    }

    #[test]
    fn headers_tolerate_bom_case_and_order() {
        let bank = QuestionBank::from_reader(
            "\u{feff}Answer,Category,Question,Choice1,Choice2,Choice3,Choice4,Choice5\n\
             D,verbal,Q,1,2,3,4,5\n"
                .as_bytes(),
        )
        .unwrap();
        assert_eq!(bank.records()[0].correct, Label::D);
        assert_eq!(bank.records()[0].category, "verbal");
    }

    #[test]
    fn spreadsheet_float_time_limits_are_accepted() {
        assert_eq!(parse_time_limit("45"), Some(45));
        assert_eq!(parse_time_limit("45.0"), Some(45));
        assert_eq!(parse_time_limit("0"), None);
        assert_eq!(parse_time_limit("12.5"), None);
        assert_eq!(parse_time_limit("-3"), None);
    }

    #[test]
    fn category_filter_and_counts() {
        let bank = load(
            "verbal,A,one,two,three,four,five,a,,,\n\
             nonverbal,B,one,two,three,four,five,a,,,\n\
             verbal,C,one,two,three,four,five,a,,,\n",
        )
        .unwrap();
        assert_eq!(bank.count_in("verbal"), 2);
        assert_eq!(bank.count_in("nonverbal"), 1);
        assert_eq!(bank.count_in("math"), 0);
        let texts: Vec<&str> = bank.in_category("verbal").map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["A", "C"]);
    }
}
