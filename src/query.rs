use serde::{Deserialize, Serialize};

use crate::domain::SpeciesName;
use crate::error::OccError;

/// Occurrence search filters. Unset filters are empty strings, never absent,
/// because every key takes part in the canonical form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OccurrenceFilters {
    pub media_type: String,
    pub country: String,
    pub has_coordinate: String,
    pub kingdom: String,
    pub basis_of_record: String,
    pub institution_code: String,
}

impl OccurrenceFilters {
    /// Filters as `(remote parameter name, value)` in canonical order, empty
    /// values included.
    pub fn entries(&self) -> [(&'static str, &str); 6] {
        [
            ("mediaType", self.media_type.as_str()),
            ("country", self.country.as_str()),
            ("hasCoordinate", self.has_coordinate.as_str()),
            ("kingdom", self.kingdom.as_str()),
            ("basisOfRecord", self.basis_of_record.as_str()),
            ("institutionCode", self.institution_code.as_str()),
        ]
    }

    /// Same filters with surrounding whitespace removed from every value.
    pub fn trimmed(&self) -> Self {
        let trim = |value: &str| value.trim().to_string();
        Self {
            media_type: trim(&self.media_type),
            country: trim(&self.country),
            has_coordinate: trim(&self.has_coordinate),
            kingdom: trim(&self.kingdom),
            basis_of_record: trim(&self.basis_of_record),
            institution_code: trim(&self.institution_code),
        }
    }

    /// Only the filters that were actually set, for the search request.
    pub fn query_params(&self) -> Vec<(&'static str, &str)> {
        self.entries()
            .into_iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(key, value)| (key, value.trim()))
            .collect()
    }
}

/// One acquisition request: which species, under which filters. Filter values
/// are stored trimmed, so the hashed query matches the request that is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    species: Vec<SpeciesName>,
    filters: OccurrenceFilters,
}

impl QuerySpec {
    pub fn new(species: Vec<SpeciesName>, filters: OccurrenceFilters) -> Result<Self, OccError> {
        if species.is_empty() {
            return Err(OccError::EmptyQuery);
        }
        Ok(Self {
            species,
            filters: filters.trimmed(),
        })
    }

    pub fn species(&self) -> &[SpeciesName] {
        &self.species
    }

    pub fn filters(&self) -> &OccurrenceFilters {
        &self.filters
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn query_params_skip_unset_filters() {
        let filters = OccurrenceFilters {
            country: "GB".to_string(),
            has_coordinate: "True".to_string(),
            kingdom: "  ".to_string(),
            ..OccurrenceFilters::default()
        };
        assert_eq!(
            filters.query_params(),
            vec![("country", "GB"), ("hasCoordinate", "True")]
        );
        assert_eq!(filters.entries().len(), 6);
    }

    #[test]
    fn filters_deserialize_with_missing_keys() {
        let filters: OccurrenceFilters =
            serde_json::from_str(r#"{"country": "GB", "basisOfRecord": "PRESERVED_SPECIMEN"}"#)
                .unwrap();
        assert_eq!(filters.country, "GB");
        assert_eq!(filters.basis_of_record, "PRESERVED_SPECIMEN");
        assert_eq!(filters.media_type, "");
    }

    #[test]
    fn empty_species_list_is_rejected() {
        let err = QuerySpec::new(Vec::new(), OccurrenceFilters::default()).unwrap_err();
        assert_matches!(err, OccError::EmptyQuery);
    }

    #[test]
    fn query_spec_stores_trimmed_filters() {
        let filters = OccurrenceFilters {
            country: " GB ".to_string(),
            kingdom: "\tPlantae".to_string(),
            ..OccurrenceFilters::default()
        };
        let query = QuerySpec::new(vec!["Quercus robur".parse().unwrap()], filters).unwrap();
        assert_eq!(query.filters().country, "GB");
        assert_eq!(query.filters().kingdom, "Plantae");
    }
}
