//! Row and header model of a mirror sheet.
//!
//! A sheet is a grid of strings. Row 0 is the header naming each column;
//! every other row is one appointment, located by its `id` cell. Columns are
//! only ever appended, so a cell's position never changes once written.

use agenda_core::Appointment;

/// Columns every projected appointment carries, in the order they are
/// first laid out.
pub const BASE_COLUMNS: [&str; 10] = [
    "id",
    "tenant_id",
    "name",
    "email",
    "phone",
    "date",
    "time",
    "status",
    "confirmed",
    "updated_at",
];

/// Column holding the appointment id.
pub const ID_COLUMN: &str = "id";

/// One appointment projected as column name -> cell value, in column order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MirrorRow {
    cells: Vec<(String, String)>,
}

impl MirrorRow {
    #[must_use]
    pub const fn new() -> Self {
        Self { cells: Vec::new() }
    }

    /// Project an appointment, base columns first, then its extra fields.
    #[must_use]
    pub fn from_appointment(appointment: &Appointment) -> Self {
        let mut row = Self::new();
        row.set("id", appointment.id.to_string());
        row.set("tenant_id", appointment.tenant_id.as_str());
        row.set("name", appointment.customer_name.as_str());
        row.set("email", appointment.customer_email.as_str());
        row.set("phone", appointment.customer_phone.as_str());
        row.set("date", appointment.date.to_string());
        row.set("time", appointment.time.as_str());
        row.set("status", appointment.status.as_str());
        row.set("confirmed", appointment.confirmed.to_string());
        row.set("updated_at", appointment.updated_at.to_rfc3339());

        for (key, value) in &appointment.extra {
            if !BASE_COLUMNS.contains(&key.as_str()) {
                row.set(key.as_str(), value.as_str());
            }
        }
        row
    }

    /// Set a cell, replacing any previous value for the column.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some(cell) => cell.1 = value,
            None => self.cells.push((column, value)),
        }
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }
}

/// The column names of a sheet, as found in its first row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header(Vec<String>);

impl Header {
    /// Read a header row, ignoring trailing blank cells.
    #[must_use]
    pub fn from_cells(cells: &[String]) -> Self {
        let len = cells
            .iter()
            .rposition(|cell| !cell.trim().is_empty())
            .map_or(0, |last| last + 1);
        Self(cells.iter().take(len).map(|c| c.trim().to_owned()).collect())
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn position(&self, column: &str) -> Option<usize> {
        self.0.iter().position(|name| name == column)
    }

    /// Whether every column of `row` already exists.
    #[must_use]
    pub fn covers(&self, row: &MirrorRow) -> bool {
        row.columns().all(|column| self.position(column).is_some())
    }

    /// This header plus the columns of `row` it lacks, appended in row order.
    ///
    /// Never drops or reorders existing columns; applying it twice yields
    /// the same header.
    #[must_use]
    pub fn union(&self, row: &MirrorRow) -> Self {
        let mut columns = self.0.clone();
        for column in row.columns() {
            if !columns.iter().any(|name| name == column) {
                columns.push(column.to_owned());
            }
        }
        Self(columns)
    }

    /// This header plus the columns of `other` it lacks, in `other`'s order.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut columns = self.0.clone();
        for column in &other.0 {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        Self(columns)
    }

    /// Whether every column of `other` exists here, in any position.
    #[must_use]
    pub fn includes(&self, other: &Self) -> bool {
        other.0.iter().all(|column| self.position(column).is_some())
    }

    /// A new sheet row holding `row`, blank where `row` has no value.
    #[must_use]
    pub fn layout(&self, row: &MirrorRow) -> Vec<String> {
        self.0
            .iter()
            .map(|column| row.get(column).unwrap_or_default().to_owned())
            .collect()
    }

    /// `existing` with the cells of `row` written over it.
    ///
    /// Cells in columns `row` does not carry are left as they were.
    #[must_use]
    pub fn overlay(&self, existing: &[String], row: &MirrorRow) -> Vec<String> {
        let mut cells = existing.to_vec();
        if cells.len() < self.0.len() {
            cells.resize(self.0.len(), String::new());
        }
        for (cell, column) in cells.iter_mut().zip(&self.0) {
            if let Some(value) = row.get(column) {
                value.clone_into(cell);
            }
        }
        cells
    }

    /// Index (into `rows`, header included) of the data row whose id cell
    /// equals `id`.
    #[must_use]
    pub fn find_row(&self, rows: &[Vec<String>], id: &str) -> Option<usize> {
        let column = self.position(ID_COLUMN)?;
        rows.iter()
            .enumerate()
            .skip(1)
            .find(|(_, cells)| cells.get(column).is_some_and(|cell| cell.trim() == id))
            .map(|(index, _)| index)
    }
}
