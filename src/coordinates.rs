//! Missing-coordinate detection and removal over a [`CoordinateFrame`].

use std::collections::BTreeSet;
use std::io::Write;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::OccError;
use crate::record::ABSENT;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinateRow {
    /// Position of the source record in the assembled dataset. Stable across
    /// removals.
    pub row_id: usize,
    pub species_name: String,
    pub latitude: String,
    pub longitude: String,
    pub uncertainty: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateColumn {
    Latitude,
    Longitude,
    Uncertainty,
}

impl CoordinateColumn {
    /// Order of the cleaning passes.
    pub const PASSES: [CoordinateColumn; 3] = [
        CoordinateColumn::Latitude,
        CoordinateColumn::Longitude,
        CoordinateColumn::Uncertainty,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CoordinateColumn::Latitude => "latitude",
            CoordinateColumn::Longitude => "longitude",
            CoordinateColumn::Uncertainty => "uncertainty",
        }
    }

    fn value(self, row: &CoordinateRow) -> &str {
        match self {
            CoordinateColumn::Latitude => &row.latitude,
            CoordinateColumn::Longitude => &row.longitude,
            CoordinateColumn::Uncertainty => &row.uncertainty,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinateFrame {
    rows: Vec<CoordinateRow>,
}

impl CoordinateFrame {
    pub fn from_rows(rows: Vec<CoordinateRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[CoordinateRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, column: CoordinateColumn) -> Vec<&str> {
        self.rows.iter().map(|row| column.value(row)).collect()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), OccError> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(["species_name", "latitude", "longitude", "uncertainty"])?;
        for row in &self.rows {
            csv.write_record([
                row.species_name.as_str(),
                row.latitude.as_str(),
                row.longitude.as_str(),
                row.uncertainty.as_str(),
            ])?;
        }
        csv.flush()
            .map_err(|err| OccError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Where the sentinel shows up in a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "positions", rename_all = "snake_case")]
pub enum MissingValues {
    /// Non-empty column made only of sentinels.
    AllMissing,
    NoneMissing,
    /// Ascending row positions holding the sentinel.
    PartiallyMissing(Vec<usize>),
}

pub fn find_missing<S: AsRef<str>>(column: &[S]) -> MissingValues {
    let positions = column
        .iter()
        .enumerate()
        .filter(|(_, value)| value.as_ref() == ABSENT)
        .map(|(index, _)| index)
        .collect::<Vec<_>>();
    if positions.is_empty() {
        MissingValues::NoneMissing
    } else if positions.len() == column.len() {
        MissingValues::AllMissing
    } else {
        MissingValues::PartiallyMissing(positions)
    }
}

/// Returns `frame` without the rows at `positions`. Positions refer to `frame`
/// as given; they are mapped to row identities before anything is removed, so
/// their order and duplicates do not matter.
pub fn drop_rows(frame: &CoordinateFrame, positions: Option<&[usize]>) -> CoordinateFrame {
    let positions = match positions {
        Some(positions) if !positions.is_empty() => positions,
        _ => {
            info!("nothing to remove");
            return frame.clone();
        }
    };

    let mut doomed = BTreeSet::new();
    for &position in positions {
        match frame.rows.get(position) {
            Some(row) => {
                doomed.insert(row.row_id);
            }
            None => warn!(position, rows = frame.len(), "row position out of range, ignored"),
        }
    }

    let rows = frame
        .rows
        .iter()
        .filter(|row| {
            let remove = doomed.contains(&row.row_id);
            if remove {
                info!(row = row.row_id, species = %row.species_name, "row removed from data set");
            }
            !remove
        })
        .cloned()
        .collect();
    CoordinateFrame { rows }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub column: CoordinateColumn,
    pub missing: MissingValues,
    pub rows_before: usize,
    pub rows_after: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub passes: Vec<PassReport>,
}

/// Latitude, longitude, then uncertainty pass. Each pass inspects the frame
/// left by the previous one. A column with no values at all is reported and its
/// rows are kept; such a column cannot tell rows apart.
pub fn clean(frame: &CoordinateFrame) -> (CoordinateFrame, CleanReport) {
    let mut current = frame.clone();
    let mut passes = Vec::with_capacity(CoordinateColumn::PASSES.len());

    for column in CoordinateColumn::PASSES {
        let missing = find_missing(&current.column(column));
        let rows_before = current.len();
        let next = match &missing {
            MissingValues::NoneMissing => {
                info!(column = column.name(), "no missing values");
                drop_rows(&current, None)
            }
            MissingValues::PartiallyMissing(positions) => {
                info!(
                    column = column.name(),
                    missing = positions.len(),
                    "dropping rows with missing values"
                );
                drop_rows(&current, Some(positions.as_slice()))
            }
            MissingValues::AllMissing => {
                warn!(
                    column = column.name(),
                    rows = rows_before,
                    "column carries no data, rows kept"
                );
                drop_rows(&current, None)
            }
        };
        passes.push(PassReport {
            column,
            missing,
            rows_before,
            rows_after: next.len(),
        });
        current = next;
    }

    (current, CleanReport { passes })
}

/// Drops rows whose uncertainty is a number above `max_meters`. Values that do
/// not parse are kept.
pub fn filter_uncertainty(frame: &CoordinateFrame, max_meters: f64) -> CoordinateFrame {
    let positions = frame
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            row.uncertainty
                .trim()
                .parse::<f64>()
                .map(|meters| meters > max_meters)
                .unwrap_or(false)
        })
        .map(|(index, _)| index)
        .collect::<Vec<_>>();
    if !positions.is_empty() {
        info!(rows = positions.len(), max_meters, "dropping low precision rows");
    }
    drop_rows(frame, Some(positions.as_slice()))
}
