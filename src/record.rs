use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{OccurrenceKey, SpeciesName, TaxonKey};

/// Placeholder written for any field the remote payload did not provide.
pub const ABSENT: &str = "";

/// Column order of the occurrence table and of the cached CSV header.
pub const COLUMNS: [&str; 12] = [
    "species_name",
    "taxon_key",
    "occurrence_key",
    "basis_of_record",
    "institution_code",
    "coordinate_system",
    "decimal_longitude",
    "decimal_latitude",
    "coordinate_uncertainty",
    "elevation",
    "date",
    "issues",
];

/// One occurrence row. Every field is either the remote value rendered as
/// text or [`ABSENT`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceRecord {
    pub species_name: String,
    pub taxon_key: String,
    pub occurrence_key: String,
    pub basis_of_record: String,
    pub institution_code: String,
    pub coordinate_system: String,
    pub decimal_longitude: String,
    pub decimal_latitude: String,
    pub coordinate_uncertainty: String,
    pub elevation: String,
    pub date: String,
    pub issues: String,
}

impl OccurrenceRecord {
    /// Field values in [`COLUMNS`] order.
    pub fn values(&self) -> [&str; 12] {
        [
            &self.species_name,
            &self.taxon_key,
            &self.occurrence_key,
            &self.basis_of_record,
            &self.institution_code,
            &self.coordinate_system,
            &self.decimal_longitude,
            &self.decimal_latitude,
            &self.coordinate_uncertainty,
            &self.elevation,
            &self.date,
            &self.issues,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Strings as-is; numbers and booleans rendered as text.
    Text,
    /// JSON numbers, or strings that parse as a number.
    Number,
    /// Arrays of scalars joined with `;`. A bare string is taken as-is.
    List,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub column: &'static str,
    pub source: &'static str,
    pub kind: FieldKind,
}

impl FieldRule {
    const fn new(column: &'static str, source: &'static str, kind: FieldKind) -> Self {
        Self {
            column,
            source,
            kind,
        }
    }

    /// Value of this field in `payload`, or [`ABSENT`] if it is missing or has
    /// a shape this rule does not accept.
    pub fn extract(&self, payload: &Value) -> String {
        payload
            .get(self.source)
            .and_then(|value| render(value, self.kind))
            .unwrap_or_else(|| ABSENT.to_string())
    }
}

/// Payload-derived columns, in table order.
pub const PAYLOAD_FIELDS: [FieldRule; 9] = [
    FieldRule::new("basis_of_record", "basisOfRecord", FieldKind::Text),
    FieldRule::new("institution_code", "institutionCode", FieldKind::Text),
    FieldRule::new("coordinate_system", "geodeticDatum", FieldKind::Text),
    FieldRule::new("decimal_longitude", "decimalLongitude", FieldKind::Number),
    FieldRule::new("decimal_latitude", "decimalLatitude", FieldKind::Number),
    FieldRule::new(
        "coordinate_uncertainty",
        "coordinateUncertaintyInMeters",
        FieldKind::Number,
    ),
    FieldRule::new("elevation", "elevation", FieldKind::Number),
    FieldRule::new("date", "eventDate", FieldKind::Text),
    FieldRule::new("issues", "issues", FieldKind::List),
];

/// Projects a fetched occurrence payload onto the fixed schema. Each payload
/// field is extracted on its own, so one malformed field never blanks another.
pub fn project_record(
    species: &SpeciesName,
    taxon_key: TaxonKey,
    occurrence_key: OccurrenceKey,
    payload: &Value,
) -> OccurrenceRecord {
    let [
        basis_of_record,
        institution_code,
        coordinate_system,
        decimal_longitude,
        decimal_latitude,
        coordinate_uncertainty,
        elevation,
        date,
        issues,
    ] = PAYLOAD_FIELDS.map(|rule| rule.extract(payload));

    OccurrenceRecord {
        species_name: species.as_str().to_string(),
        taxon_key: taxon_key.to_string(),
        occurrence_key: occurrence_key.to_string(),
        basis_of_record,
        institution_code,
        coordinate_system,
        decimal_longitude,
        decimal_latitude,
        coordinate_uncertainty,
        elevation,
        date,
        issues,
    }
}

fn render(value: &Value, kind: FieldKind) -> Option<String> {
    match kind {
        FieldKind::Text => render_scalar(value),
        FieldKind::Number => match value {
            Value::Number(number) => Some(number.to_string()),
            Value::String(text) => {
                let text = text.trim();
                text.parse::<f64>()
                    .ok()
                    .filter(|number| number.is_finite())
                    .map(|_| text.to_string())
            }
            _ => None,
        },
        FieldKind::List => match value {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(render_scalar)
                    .collect::<Vec<_>>()
                    .join(";"),
            ),
            Value::String(text) => Some(text.clone()),
            _ => None,
        },
    }
}

fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn species() -> SpeciesName {
        "Quercus robur".parse().unwrap()
    }

    #[test]
    fn payload_rules_follow_column_order() {
        let columns = PAYLOAD_FIELDS.map(|rule| rule.column);
        assert_eq!(columns, COLUMNS[3..]);
    }

    #[test]
    fn projects_full_payload() {
        let payload = json!({
            "key": 1234,
            "basisOfRecord": "HUMAN_OBSERVATION",
            "institutionCode": "K",
            "geodeticDatum": "WGS84",
            "decimalLongitude": -1.25,
            "decimalLatitude": 51.75,
            "coordinateUncertaintyInMeters": 30.0,
            "elevation": 112,
            "eventDate": "2020-05-01T10:00:00",
            "issues": ["COORDINATE_ROUNDED", "GEODETIC_DATUM_ASSUMED_WGS84"]
        });
        let record = project_record(
            &species(),
            TaxonKey::new(2878688),
            OccurrenceKey::new(1234),
            &payload,
        );
        assert_eq!(record.species_name, "Quercus robur");
        assert_eq!(record.taxon_key, "2878688");
        assert_eq!(record.occurrence_key, "1234");
        assert_eq!(record.basis_of_record, "HUMAN_OBSERVATION");
        assert_eq!(record.decimal_longitude, "-1.25");
        assert_eq!(record.decimal_latitude, "51.75");
        assert_eq!(record.coordinate_uncertainty, "30.0");
        assert_eq!(record.elevation, "112");
        assert_eq!(
            record.issues,
            "COORDINATE_ROUNDED;GEODETIC_DATUM_ASSUMED_WGS84"
        );
    }

    #[test]
    fn empty_payload_yields_all_sentinels() {
        let record = project_record(
            &species(),
            TaxonKey::new(1),
            OccurrenceKey::new(2),
            &json!({}),
        );
        let values = record.values();
        assert_eq!(values.len(), COLUMNS.len());
        assert!(values[3..].iter().all(|value| *value == ABSENT));
    }

    #[test]
    fn broken_elevation_keeps_coordinates() {
        let payload = json!({
            "decimalLatitude": 52.1,
            "decimalLongitude": "0.5",
            "elevation": {"value": "high"}
        });
        let record = project_record(
            &species(),
            TaxonKey::new(1),
            OccurrenceKey::new(2),
            &payload,
        );
        assert_eq!(record.elevation, ABSENT);
        assert_eq!(record.decimal_latitude, "52.1");
        assert_eq!(record.decimal_longitude, "0.5");
    }

    #[test]
    fn non_numeric_coordinate_is_absent() {
        let payload = json!({ "decimalLatitude": "north", "decimalLongitude": null });
        let record = project_record(
            &species(),
            TaxonKey::new(1),
            OccurrenceKey::new(2),
            &payload,
        );
        assert_eq!(record.decimal_latitude, ABSENT);
        assert_eq!(record.decimal_longitude, ABSENT);
    }
}
