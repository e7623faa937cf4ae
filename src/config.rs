use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::SpeciesName;
use crate::error::OccError;
use crate::query::{OccurrenceFilters, QuerySpec};

pub const DEFAULT_CONFIG_FILE: &str = "gbif-occ.json";

/// On-disk query file.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub search_name: Option<String>,
    #[serde(default)]
    pub species: Vec<String>,
    #[serde(default)]
    pub filters: OccurrenceFilters,
}

/// Command-line pieces layered over the query file. A non-empty species list
/// replaces the file's list; each filter given replaces the file's value.
#[derive(Debug, Clone, Default)]
pub struct QueryOverrides {
    pub species: Vec<String>,
    pub media_type: Option<String>,
    pub country: Option<String>,
    pub has_coordinate: Option<String>,
    pub kingdom: Option<String>,
    pub basis_of_record: Option<String>,
    pub institution_code: Option<String>,
}

impl QueryOverrides {
    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
            && self.media_type.is_none()
            && self.country.is_none()
            && self.has_coordinate.is_none()
            && self.kingdom.is_none()
            && self.basis_of_record.is_none()
            && self.institution_code.is_none()
    }

    fn apply(self, config: &mut Config) {
        if !self.species.is_empty() {
            config.species = self.species;
        }
        let filters = &mut config.filters;
        let pairs = [
            (&mut filters.media_type, self.media_type),
            (&mut filters.country, self.country),
            (&mut filters.has_coordinate, self.has_coordinate),
            (&mut filters.kingdom, self.kingdom),
            (&mut filters.basis_of_record, self.basis_of_record),
            (&mut filters.institution_code, self.institution_code),
        ];
        for (slot, value) in pairs {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub search_name: Option<String>,
    pub query: QuerySpec,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the query file (explicit path, or `gbif-occ.json` when present)
    /// and applies `overrides`. Without a file, the overrides alone must name
    /// at least one species.
    pub fn resolve(
        path: Option<&str>,
        overrides: QueryOverrides,
    ) -> Result<ResolvedConfig, OccError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let mut config = if path.is_none() && !config_path.exists() {
            if overrides.is_empty() {
                return Err(OccError::MissingConfig);
            }
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| OccError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| OccError::ConfigParse(err.to_string()))?
        };

        overrides.apply(&mut config);
        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, OccError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let species = config
            .species
            .iter()
            .map(|name| name.parse::<SpeciesName>())
            .collect::<Result<Vec<_>, OccError>>()?;
        let query = QuerySpec::new(species, config.filters)?;

        Ok(ResolvedConfig {
            schema_version,
            search_name: config.search_name.filter(|name| !name.trim().is_empty()),
            query,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_query_file() {
        let config: Config = serde_json::from_str(
            r#"{
                "search_name": "Occurrence data from native trees in GB",
                "species": ["Quercus robur", "Fagus  sylvatica"],
                "filters": {"country": "GB", "hasCoordinate": "True"}
            }"#,
        )
        .unwrap();

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.query.species().len(), 2);
        assert_eq!(resolved.query.species()[1].as_str(), "Fagus sylvatica");
        assert_eq!(resolved.query.filters().country, "GB");
        assert_eq!(resolved.query.filters().kingdom, "");
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = Config {
            species: vec!["Quercus robur".to_string()],
            filters: OccurrenceFilters {
                country: "GB".to_string(),
                ..OccurrenceFilters::default()
            },
            ..Config::default()
        };
        QueryOverrides {
            country: Some("IE".to_string()),
            kingdom: Some("Plantae".to_string()),
            ..QueryOverrides::default()
        }
        .apply(&mut config);

        assert_eq!(config.species, vec!["Quercus robur".to_string()]);
        assert_eq!(config.filters.country, "IE");
        assert_eq!(config.filters.kingdom, "Plantae");
    }

    #[test]
    fn invalid_species_is_reported() {
        let config = Config {
            species: vec!["Quercus robur".to_string(), " ".to_string()],
            ..Config::default()
        };
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, OccError::InvalidSpeciesName(_));
    }

    #[test]
    fn empty_species_list_is_reported() {
        let err = ConfigLoader::resolve_config(Config::default()).unwrap_err();
        assert_matches!(err, OccError::EmptyQuery);
    }
}
