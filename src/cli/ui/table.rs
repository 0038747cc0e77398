use std::fmt::{self, Display, Formatter};

use tabled::{builder::Builder, settings::Style as TableStyle};

use super::painter::Painter;

/// A two-column field/value table that renders via `Display`.
#[derive(Debug)]
pub(crate) struct FieldTable {
    rows: Vec<[String; 2]>,
}

impl FieldTable {
    /// Creates a table whose field names are muted.
    pub(crate) fn new<'a>(
        painter: &Painter,
        rows: impl IntoIterator<Item = (&'a str, String)>,
    ) -> Self {
        Self {
            rows: rows
                .into_iter()
                .map(|(field, value)| [painter.muted(field), value])
                .collect(),
        }
    }
}

impl Display for FieldTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        builder.push_record(["field", "value"]);
        for row in &self.rows {
            builder.push_record(row);
        }
        let mut table = builder.build();
        table.with(TableStyle::rounded());
        write!(f, "{table}")
    }
}
