use std::fmt::{self, Display, Formatter};

use tabled::builder::Builder;
use tabled::settings::object::Columns;
use tabled::settings::{Alignment, Style};

use super::painter::Painter;

/// Rounded table for endpoint listings and command reports.
#[derive(Debug)]
pub(crate) struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    numeric_columns: Vec<usize>,
}

impl Table {
    pub(crate) fn new(headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            numeric_columns: Vec::new(),
        }
    }

    /// Right-aligns column `index`, for byte counts and payload sizes.
    pub(crate) fn numeric_column(mut self, index: usize) -> Self {
        self.numeric_columns.push(index);
        self
    }

    pub(crate) fn rows(mut self, rows: impl IntoIterator<Item = Vec<String>>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Two columns: dimmed field names, then values.
    pub(crate) fn key_value(painter: &Painter, rows: Vec<(&str, String)>) -> Self {
        Self::new(["field", "value"]).rows(
            rows.into_iter()
                .map(|(field, value)| vec![painter.detail(field), value]),
        )
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        builder.push_record(&self.headers);
        for row in &self.rows {
            builder.push_record(row);
        }
        let mut table = builder.build();
        table.with(Style::rounded());
        for &index in &self.numeric_columns {
            table.modify(Columns::new(index..=index), Alignment::right());
        }
        write!(f, "{table}")
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    #[test]
    fn numeric_columns_are_right_aligned() {
        let table = Table::new(["name", "max_payload"])
            .numeric_column(1)
            .rows([
                vec!["Keys".to_string(), "20".to_string()],
                vec!["Pads".to_string(), "514".to_string()],
            ]);

        assert_snapshot!(table.to_string(), @r"
        ╭──────┬─────────────╮
        │ name │ max_payload │
        ├──────┼─────────────┤
        │ Keys │          20 │
        │ Pads │         514 │
        ╰──────┴─────────────╯
        ");
    }

    #[test]
    fn key_value_table_renders_field_value_pairs() {
        let painter = Painter::new(false);
        let table = Table::key_value(
            &painter,
            vec![("identity", "AA:BB".into()), ("sent", "3 message(s)".into())],
        );

        assert_snapshot!(table.to_string(), @r"
        ╭──────────┬──────────────╮
        │ field    │ value        │
        ├──────────┼──────────────┤
        │ identity │ AA:BB        │
        │ sent     │ 3 message(s) │
        ╰──────────┴──────────────╯
        ");
    }
}
