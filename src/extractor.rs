// Page extraction layer - turns rendered portal tables into records
use crate::{
    business::{first_word, normalize},
    models::{Record, ScrapeError}
};

use scraper::{Html, Selector};

/// Text the portal puts in a table that exists but has no rows.
pub const NO_MATCHING_RECORDS: &str = "No matching records";

// How one column maps onto a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Named(&'static str),
    // only the text before the first space is kept
    FirstWord(&'static str),
    // present in the table but never copied into the record
    Excluded(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    // every row is data, a "No matching records" cell empties the result
    Grid,
    // leading header rows and leading cells per row are skipped, empty cells kept as ""
    DesktopGrid { header_rows: usize, leading_cells: usize },
}

// Positional description of one portal table
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub name: &'static str,
    pub fields: &'static [Field],
    pub layout: Layout,
}

// Mobile summary grid: class, teacher, "93.5 A"
pub const MOBILE_GRADES: TableSchema = TableSchema {
    name: "mobile grades",
    fields: &[Field::Named("class"), Field::Named("teacher"), Field::FirstWord("average")],
    layout: Layout::Grid,
};

// Desktop class list, the first cell of each row is a checkbox
pub const DESKTOP_GRADES: TableSchema = TableSchema {
    name: "desktop grades",
    fields: &[
        Field::Named("class"),
        Field::Named("teacher"),
        Field::Named("semester"),
        Field::Named("period"),
        Field::Named("room"),
        Field::Named("average"),
        Field::Named("absences"),
        Field::Named("tardies"),
    ],
    layout: Layout::DesktopGrid { header_rows: 1, leading_cells: 1 },
};

// Assignment list of one class
pub const ASSIGNMENTS: TableSchema = TableSchema {
    name: "assignments",
    fields: &[
        Field::Excluded("checkbox"),
        Field::Named("assignmentName"),
        Field::Named("dateAssigned"),
        Field::Named("dateDue"),
        Field::Named("categoryDesc"),
        Field::Named("categoryWeight"),
        Field::Excluded("altAssignmentName"),
        Field::Excluded("longScore"),
        Field::Named("percentage"),
        Field::Named("fraction"),
        Field::Named("totalScore"),
    ],
    layout: Layout::Grid,
};

/// A schema bound to its row and cell selectors.
pub struct TableSpec {
    rows: Selector,
    cells: Selector,
    schema: TableSchema,
}

impl TableSpec {
    pub fn new(row_selector: &str, cell_selector: &str, schema: TableSchema) -> Result<Self, ScrapeError> {
        Ok(Self {
            rows: parse_selector(row_selector)?,
            cells: parse_selector(cell_selector)?,
            schema,
        })
    }

    pub fn name(&self) -> &'static str {
        self.schema.name
    }

    pub fn extract_html(&self, html: &str) -> Vec<Record> {
        self.extract(&Html::parse_document(html))
    }

    // Never fails: missing cells just leave fields out, a missing table gives no rows
    pub fn extract(&self, document: &Html) -> Vec<Record> {
        match self.schema.layout {
            Layout::Grid => self.extract_grid(document),
            Layout::DesktopGrid { header_rows, leading_cells } => {
                self.extract_desktop(document, header_rows, leading_cells)
            }
        }
    }

    fn extract_grid(&self, document: &Html) -> Vec<Record> {
        let mut records = Vec::new();

        'rows: for row in document.select(&self.rows) {
            let mut record = Record::new();

            for (index, cell) in row.select(&self.cells).enumerate() {
                let text = normalize(&cell.text().collect::<String>());

                // the table is there but says it is empty
                if text == NO_MATCHING_RECORDS {
                    records.clear();
                    continue 'rows;
                }

                if let Some(field) = self.schema.fields.get(index) {
                    assign(&mut record, *field, text);
                }
            }

            records.push(record);
        }

        records
    }

    fn extract_desktop(&self, document: &Html, header_rows: usize, leading_cells: usize) -> Vec<Record> {
        document
            .select(&self.rows)
            .skip(header_rows)
            .map(|row| {
                let mut record = Record::new();
                let cells = row.select(&self.cells).skip(leading_cells);

                for (field, cell) in self.schema.fields.iter().zip(cells) {
                    // empty text is stored as "" to keep the columns aligned
                    assign(&mut record, *field, normalize(&cell.text().collect::<String>()));
                }

                record
            })
            .collect()
    }
}

fn assign(record: &mut Record, field: Field, text: String) {
    match field {
        Field::Named(name) => {
            record.insert(name, text);
        }
        Field::FirstWord(name) => {
            record.insert(name, first_word(&text));
        }
        Field::Excluded(_) => {}
    }
}

pub fn parse_selector(selector: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(selector).map_err(|e| ScrapeError::Selector(format!("{}: {}", selector, e)))
}

/// Whether the document has at least one element matching `selector`
pub fn has_element(html: &str, selector: &str) -> Result<bool, ScrapeError> {
    let selector = parse_selector(selector)?;
    Ok(Html::parse_document(html).select(&selector).next().is_some())
}
