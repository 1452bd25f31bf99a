//! Batch representation passed between processors and models.

use serde_json::{Map, Value};

use crate::error::PorterError;
use crate::types::{ID_KEY, PREDICTION_KEY};

/// One record: its correlation id and its named values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub id: Value,
    pub values: Map<String, Value>,
}

impl Row {
    pub fn new(id: Value, values: Map<String, Value>) -> Self {
        Self { id, values }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.values.insert(column.into(), value);
    }
}

/// Ordered rows. Ids travel with their rows, so reordering or filtering rows
/// keeps every value attached to the record it came from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    rows: Vec<Row>,
}

impl Frame {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Split the `id` field out of each record.
    pub fn from_records(records: Vec<Map<String, Value>>) -> Result<Self, PorterError> {
        let mut rows = Vec::with_capacity(records.len());
        for mut record in records {
            let Some(id) = record.shift_remove(ID_KEY) else {
                return Err(PorterError::column_violations(
                    vec![ID_KEY.to_string()],
                    Vec::new(),
                ));
            };
            rows.push(Row::new(id, record));
        }
        Ok(Self { rows })
    }

    /// Frame of `{id, prediction}` rows.
    pub fn from_predictions<I>(ids: I, predictions: Vec<Value>) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let rows = ids
            .into_iter()
            .zip(predictions)
            .map(|(id, prediction)| {
                let mut values = Map::new();
                values.insert(PREDICTION_KEY.to_string(), prediction);
                Row::new(id, values)
            })
            .collect();
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut Vec<Row> {
        &mut self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(|row| &row.id)
    }

    pub fn column<'a>(&'a self, name: &'a str) -> impl Iterator<Item = Option<&'a Value>> + 'a {
        self.rows.iter().map(move |row| row.get(name))
    }

    /// Keep only the named columns.
    pub fn select(self, columns: &[String]) -> Self {
        let rows = self
            .rows
            .into_iter()
            .map(|mut row| {
                row.values.retain(|key, _| columns.iter().any(|c| c == key));
                row
            })
            .collect();
        Self { rows }
    }

    /// Replace each value of `name` with `f(value)`; rows lacking the column
    /// are passed `Value::Null`.
    pub fn map_column<F>(mut self, name: &str, mut f: F) -> Self
    where
        F: FnMut(&Value) -> Value,
    {
        for row in &mut self.rows {
            let mapped = f(row.values.get(name).unwrap_or(&Value::Null));
            row.values.insert(name.to_string(), mapped);
        }
        self
    }

    /// Add or replace a column, one value per row in row order.
    pub fn with_column(mut self, name: &str, values: Vec<Value>) -> Result<Self, PorterError> {
        if values.len() != self.rows.len() {
            return Err(PorterError::Internal(anyhow::anyhow!(
                "column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.rows.len()
            )));
        }
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.values.insert(name.to_string(), value);
        }
        Ok(self)
    }

    /// Pairs of `(id, prediction)`. Every row must carry a prediction.
    pub fn into_predictions(self) -> Result<(Vec<Value>, Vec<Value>), PorterError> {
        let mut ids = Vec::with_capacity(self.rows.len());
        let mut predictions = Vec::with_capacity(self.rows.len());
        for mut row in self.rows {
            let Some(prediction) = row.values.shift_remove(PREDICTION_KEY) else {
                return Err(PorterError::Prediction(anyhow::anyhow!(
                    "no prediction for record with id {}",
                    row.id
                )));
            };
            ids.push(row.id);
            predictions.push(prediction);
        }
        Ok((ids, predictions))
    }
}

impl IntoIterator for Frame {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a Frame {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

impl FromIterator<Row> for Frame {
    fn from_iter<T: IntoIterator<Item = Row>>(iter: T) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}
