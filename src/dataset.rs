use std::io::{Read, Write};

use serde::Serialize;

use crate::coordinates::{CoordinateFrame, CoordinateRow};
use crate::error::OccError;
use crate::record::{COLUMNS, OccurrenceRecord};

/// Assembled occurrence table. Row order is retrieval order; rows are never
/// merged or reordered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OccurrenceDataset {
    records: Vec<OccurrenceRecord>,
}

impl OccurrenceDataset {
    pub fn assemble<I>(records: I) -> Self
    where
        I: IntoIterator<Item = OccurrenceRecord>,
    {
        Self {
            records: records.into_iter().collect(),
        }
    }

    pub fn records(&self) -> &[OccurrenceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Writes the table with its header row, even when there are no rows.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), OccError> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(COLUMNS)?;
        for record in &self.records {
            csv.write_record(record.values())?;
        }
        csv.flush()
            .map_err(|err| OccError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, OccError> {
        let mut buffer = Vec::new();
        self.write_csv(&mut buffer)?;
        Ok(buffer)
    }

    /// Reads a table written by [`OccurrenceDataset::write_csv`]. The header
    /// must match the fixed schema exactly.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self, OccError> {
        let mut csv = csv::Reader::from_reader(reader);
        let headers = csv.headers()?.clone();
        if headers.iter().ne(COLUMNS.iter().copied()) {
            return Err(OccError::Csv(format!(
                "unexpected header: {}",
                headers.iter().collect::<Vec<_>>().join(",")
            )));
        }
        let records = csv
            .deserialize::<OccurrenceRecord>()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { records })
    }

    /// Number of data rows in a CSV table, header excluded.
    pub fn count_rows<R: Read>(reader: R) -> Result<usize, OccError> {
        let mut csv = csv::Reader::from_reader(reader);
        let mut rows = 0;
        for record in csv.records() {
            record?;
            rows += 1;
        }
        Ok(rows)
    }

    /// Narrow coordinate view, one row per record, tagged with the record's
    /// position in this dataset.
    pub fn coordinate_frame(&self) -> CoordinateFrame {
        CoordinateFrame::from_rows(
            self.records
                .iter()
                .enumerate()
                .map(|(row_id, record)| CoordinateRow {
                    row_id,
                    species_name: record.species_name.clone(),
                    latitude: record.decimal_latitude.clone(),
                    longitude: record.decimal_longitude.clone(),
                    uncertainty: record.coordinate_uncertainty.clone(),
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, lat: &str) -> OccurrenceRecord {
        OccurrenceRecord {
            species_name: "Quercus robur".to_string(),
            taxon_key: "2878688".to_string(),
            occurrence_key: key.to_string(),
            decimal_latitude: lat.to_string(),
            issues: "COORDINATE_ROUNDED;ZERO_COORDINATE".to_string(),
            ..OccurrenceRecord::default()
        }
    }

    #[test]
    fn assemble_keeps_order_and_duplicates() {
        let dataset =
            OccurrenceDataset::assemble(vec![record("2", "1"), record("1", "2"), record("2", "1")]);
        let keys = dataset
            .records()
            .iter()
            .map(|r| r.occurrence_key.as_str())
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["2", "1", "2"]);
    }

    #[test]
    fn empty_dataset_still_writes_header() {
        let bytes = OccurrenceDataset::default().to_csv_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.trim_end(), COLUMNS.join(","));
    }

    #[test]
    fn csv_preserves_sentinels() {
        let dataset = OccurrenceDataset::assemble(vec![record("7", ""), record("8", "51.5")]);
        let bytes = dataset.to_csv_bytes().unwrap();
        let loaded = OccurrenceDataset::read_csv(bytes.as_slice()).unwrap();
        assert_eq!(loaded, dataset);
        assert_eq!(loaded.records()[0].decimal_latitude, "");
    }

    #[test]
    fn read_rejects_foreign_header() {
        let err = OccurrenceDataset::read_csv("a,b\n1,2\n".as_bytes()).unwrap_err();
        assert!(matches!(err, OccError::Csv(_)));
    }

    #[test]
    fn coordinate_frame_tags_rows() {
        let dataset = OccurrenceDataset::assemble(vec![record("7", "50.1"), record("8", "")]);
        let frame = dataset.coordinate_frame();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.rows()[1].row_id, 1);
        assert_eq!(frame.rows()[0].latitude, "50.1");
    }
}
