//! Turns `<table>` markup into header-keyed rows.

use std::{fmt::Display, iter};

use getset::Getters;
use itertools::Itertools;
use scraper::ElementRef;
use serde::{Serialize, Serializer};

use crate::{regex, selector};

/// A non-empty cell.  Empty cells are represented as `None` in a row.
#[derive(Clone, PartialEq, Debug)]
pub enum CellValue {
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Numbers may use `,` as a thousands separator and U+2212 as a minus
    /// sign; anything else that is not blank is kept as text.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let normalized = text.replace('\u{2212}', "-");
        let pattern = regex!(r"^[+-]?(?:(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?|\.\d+)$");
        if pattern.is_match(&normalized) {
            if let Ok(value) = normalized.replace(',', "").parse() {
                return Some(Self::Number(value));
            }
        }
        Some(Self::Text(text.to_owned()))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(_) => None,
        }
    }
}

impl Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Number(value) if value.fract() == 0. && value.abs() < 1e15 => {
                serializer.serialize_i64(*value as i64)
            }
            Self::Number(value) => serializer.serialize_f64(*value),
            Self::Text(text) => serializer.serialize_str(text),
        }
    }
}

pub type Row = Vec<Option<CellValue>>;

#[derive(Clone, PartialEq, Debug, Getters)]
#[getset(get = "pub")]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Row>,
}

impl RawTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Result<usize, TableError> {
        self.headers
            .iter()
            .position(|header| header == name)
            .ok_or_else(|| TableError::MissingColumn {
                name: name.to_owned(),
                headers: self.headers.clone(),
            })
    }

    pub fn column<'a>(
        &'a self,
        name: &str,
    ) -> Result<impl Iterator<Item = Option<&'a CellValue>> + 'a, TableError> {
        let index = self.column_index(name)?;
        Ok(self.rows.iter().map(move |row| row[index].as_ref()))
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("The table does not start with a header row")]
    NoHeader,
    #[error("Row {row} has {found} cells while the header has {expected} columns")]
    RowTooWide {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("Column {name:?} not found among {headers:?}")]
    MissingColumn { name: String, headers: Vec<String> },
}

/// Parses every table within `fragment`, the fragment itself included, in
/// document order.  Nested tables are returned as tables of their own.
pub fn extract_tables(fragment: ElementRef) -> Result<Vec<RawTable>, TableError> {
    iter::once(fragment)
        .filter(|element| element.value().name() == "table")
        .chain(fragment.select(selector!("table")))
        .map(parse_table)
        .collect()
}

#[derive(Clone)]
struct GridCell {
    header: bool,
    text: String,
}

struct Span {
    cell: GridCell,
    remaining: usize,
}

/// Parses one `<table>` element, ignoring the rows of tables nested in it.
pub fn parse_table(table: ElementRef) -> Result<RawTable, TableError> {
    let mut rows = table_rows(table)
        .into_iter()
        .map(row_cells)
        .filter(|cells| !cells.is_empty());
    let mut spans: Vec<Option<Span>> = vec![];
    let headers = match rows.next() {
        Some(cells) if cells.iter().all(|(cell, _)| cell.header) => fill_spans(&mut spans, cells)
            .into_iter()
            .flatten()
            .map(|cell| cell.text)
            .collect_vec(),
        _ => return Err(TableError::NoHeader),
    };
    let width = headers.len();

    let mut body = vec![];
    for (i, cells) in rows.enumerate() {
        let own_header_row = cells.iter().all(|(cell, _)| cell.header);
        let grid = fill_spans(&mut spans, cells);
        if own_header_row {
            continue;
        }
        if grid.len() > width {
            return Err(TableError::RowTooWide {
                row: i,
                found: grid.len(),
                expected: width,
            });
        }
        let mut row = grid
            .into_iter()
            .map(|cell| cell.and_then(|cell| CellValue::parse(&cell.text)))
            .collect_vec();
        row.resize(width, None);
        body.push(row);
    }

    Ok(RawTable {
        headers,
        rows: body,
    })
}

fn table_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut rows = vec![];
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|e| e.value().name() == "tr"),
            ),
            _ => {}
        }
    }
    rows
}

/// The cells of a row, with `colspan` already expanded.  `rowspan` is kept
/// alongside so that [`fill_spans`] can carry the cell downwards.
fn row_cells(row: ElementRef) -> Vec<(GridCell, usize)> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|e| matches!(e.value().name(), "th" | "td"))
        .flat_map(|e| {
            let cell = GridCell {
                header: e.value().name() == "th",
                text: e.text().collect::<String>().split_whitespace().join(" "),
            };
            let colspan = span_attr(e, "colspan");
            let rowspan = span_attr(e, "rowspan");
            iter::repeat((cell, rowspan)).take(colspan)
        })
        .collect()
}

fn span_attr(e: ElementRef, name: &str) -> usize {
    e.value()
        .attr(name)
        .and_then(|value| value.trim().parse().ok())
        .filter(|&n: &usize| n > 0)
        .unwrap_or(1)
}

/// Places the row's own cells into the columns not occupied by a cell
/// spanning down from a previous row.
fn fill_spans(
    spans: &mut Vec<Option<Span>>,
    cells: Vec<(GridCell, usize)>,
) -> Vec<Option<GridCell>> {
    let mut cells = cells.into_iter();
    let mut grid = vec![];
    let mut col = 0;
    loop {
        if col >= spans.len() {
            spans.push(None);
        }
        if let Some(span) = &mut spans[col] {
            grid.push(Some(span.cell.clone()));
            span.remaining -= 1;
            if span.remaining == 0 {
                spans[col] = None;
            }
        } else if let Some((cell, rowspan)) = cells.next() {
            if rowspan > 1 {
                spans[col] = Some(Span {
                    cell: cell.clone(),
                    remaining: rowspan - 1,
                });
            }
            grid.push(Some(cell));
        } else if spans[col..].iter().any(Option::is_some) {
            grid.push(None);
        } else {
            break;
        }
        col += 1;
    }
    grid
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;
    use scraper::Html;

    use super::{extract_tables, CellValue, RawTable, TableError};

    fn tables(markup: &str) -> Result<Vec<RawTable>, TableError> {
        extract_tables(Html::parse_document(markup).root_element())
    }

    fn text(s: &str) -> Option<CellValue> {
        Some(CellValue::Text(s.to_owned()))
    }

    fn num(n: f64) -> Option<CellValue> {
        Some(CellValue::Number(n))
    }

    #[test]
    fn test_cell_value_parse() {
        assert_eq!(CellValue::parse("14"), num(14.));
        assert_eq!(CellValue::parse(" 1,250 "), num(1250.));
        assert_eq!(CellValue::parse("-0.5"), num(-0.5));
        assert_eq!(CellValue::parse("\u{2212}10"), num(-10.));
        assert_eq!(CellValue::parse("+5"), num(5.));
        assert_eq!(CellValue::parse("8x22"), text("8x22"));
        assert_eq!(CellValue::parse("20%"), text("20%"));
        assert_eq!(CellValue::parse("inf"), text("inf"));
        assert_eq!(CellValue::parse("1,2"), text("1,2"));
        assert_eq!(CellValue::parse("   "), None);
    }

    #[test]
    fn test_cell_value_display() {
        assert_eq!(CellValue::Number(22.).to_string(), "22");
        assert_eq!(CellValue::Number(0.25).to_string(), "0.25");
        assert_eq!(CellValue::Text("Tracer".to_owned()).to_string(), "Tracer");
    }

    #[test]
    fn test_simple_table() {
        let res = tables(
            r#"<table class="wikitable">
                <tr><th>Icon</th><th>Name</th><th>Damage</th></tr>
                <tr><td><img src="a.png"></td><td> 9mm
                    FMJ </td><td>58</td></tr>
                <tr><td></td><td>12/70 buckshot</td><td>8x22</td></tr>
            </table>"#,
        )
        .unwrap();
        assert_eq!(res.len(), 1);
        let table = &res[0];
        assert_eq!(table.headers(), &["Icon", "Name", "Damage"]);
        assert_eq!(
            table.rows(),
            &[
                vec![None, text("9mm FMJ"), num(58.)],
                vec![None, text("12/70 buckshot"), text("8x22")],
            ]
        );
        assert_eq!(
            table.column("Name").unwrap().map(|x| x.unwrap().to_string()).collect_vec(),
            ["9mm FMJ", "12/70 buckshot"]
        );
    }

    #[test]
    fn test_no_tables_is_empty() {
        assert_eq!(tables("<p>Nothing here</p>").unwrap(), vec![]);
    }

    #[test]
    fn test_tables_in_document_order_including_nested() {
        let res = tables(
            r#"<table><tr><th>A</th></tr><tr><td>
                 <table><tr><th>Inner</th></tr><tr><td>x</td></tr></table>
               </td></tr></table>
               <table><tr><th>B</th></tr><tr><td>2</td></tr></table>"#,
        )
        .unwrap();
        let headers = res.iter().map(|t| t.headers()[0].as_str()).collect_vec();
        assert_eq!(headers, ["A", "Inner", "B"]);
        // The outer table does not absorb the inner table's rows.
        assert_eq!(res[0].len(), 1);
        assert_eq!(res[2].rows(), &[vec![num(2.)]]);
    }

    #[test]
    fn test_fragment_that_is_a_table() {
        let html = Html::parse_document(
            r#"<table class="wikitable"><tr><th>Name</th></tr><tr><td>.45 ACP</td></tr></table>"#,
        );
        let table = html
            .select(crate::selector!("table.wikitable"))
            .next()
            .unwrap();
        let res = extract_tables(table).unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].rows(), &[vec![text(".45 ACP")]]);
    }

    #[test]
    fn test_spans() {
        let res = tables(
            r#"<table>
                <thead><tr><th>Name</th><th colspan="2">Chance</th><th>Sold by</th></tr></thead>
                <tbody>
                <tr><th>Sub</th><th>Frag</th><th>Ricochet</th><th></th></tr>
                <tr><td>A</td><td>1</td><td>2</td><td rowspan="2">Prapor</td></tr>
                <tr><td>B</td><td colspan="2">3</td></tr>
                <tr><td>C</td></tr>
                </tbody>
            </table>"#,
        )
        .unwrap();
        let table = &res[0];
        assert_eq!(table.headers(), &["Name", "Chance", "Chance", "Sold by"]);
        assert_eq!(
            table.rows(),
            &[
                vec![text("A"), num(1.), num(2.), text("Prapor")],
                vec![text("B"), num(3.), num(3.), text("Prapor")],
                vec![text("C"), None, None, None],
            ]
        );
    }

    #[test]
    fn test_rowspan_in_first_column() {
        let res = tables(
            r#"<table>
                <tr><th>Caliber</th><th>Name</th></tr>
                <tr><td rowspan="2">9x19mm</td><td>PSO</td></tr>
                <tr><td>Luger CCI</td></tr>
            </table>"#,
        )
        .unwrap();
        assert_eq!(
            res[0].rows(),
            &[
                vec![text("9x19mm"), text("PSO")],
                vec![text("9x19mm"), text("Luger CCI")],
            ]
        );
    }

    #[test]
    fn test_header_rowspan_keeps_body_columns_aligned() {
        let res = tables(
            r#"<table>
                <tr><th rowspan="2">Caliber</th><th>Name</th><th>Damage</th></tr>
                <tr><td>PSO</td><td>50</td></tr>
                <tr><td>9x19mm</td><td>Luger CCI</td><td>70</td></tr>
            </table>"#,
        )
        .unwrap();
        assert_eq!(res[0].headers(), &["Caliber", "Name", "Damage"]);
        assert_eq!(
            res[0].rows(),
            &[
                vec![text("Caliber"), text("PSO"), num(50.)],
                vec![text("9x19mm"), text("Luger CCI"), num(70.)],
            ]
        );
    }

    #[test]
    fn test_table_without_header_is_an_error() {
        assert_eq!(
            tables("<table><tr><td>1</td><td>2</td></tr></table>"),
            Err(TableError::NoHeader)
        );
        assert_eq!(tables("<table></table>"), Err(TableError::NoHeader));
    }

    #[test]
    fn test_row_wider_than_header_is_an_error() {
        assert_eq!(
            tables("<table><tr><th>A</th></tr><tr><td>1</td><td>2</td></tr></table>"),
            Err(TableError::RowTooWide {
                row: 0,
                found: 2,
                expected: 1
            })
        );
    }

    #[test]
    fn test_missing_column() {
        let res = tables("<table><tr><th>A</th></tr></table>").unwrap();
        assert!(matches!(
            res[0].column("Name"),
            Err(TableError::MissingColumn { .. })
        ));
    }
}
