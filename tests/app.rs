use std::collections::HashMap;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::{Value, json};

use gbif_occ::app::{AcquireOptions, App, FilterOptions};
use gbif_occ::coordinates::MissingValues;
use gbif_occ::domain::{OccurrenceKey, SpeciesName, TaxonKey};
use gbif_occ::error::OccError;
use gbif_occ::fingerprint::fingerprint;
use gbif_occ::gbif::{GbifClient, OccurrencePage};
use gbif_occ::output::JsonOutput;
use gbif_occ::query::{OccurrenceFilters, QuerySpec};
use gbif_occ::store::Store;

#[derive(Default)]
struct MockGbif {
    calls: Mutex<usize>,
    taxa: HashMap<String, u64>,
    keys: HashMap<u64, Vec<u64>>,
    records: HashMap<u64, Value>,
}

impl MockGbif {
    fn oaks() -> Self {
        let mut mock = MockGbif::default();
        mock.taxa.insert("Quercus robur".to_string(), 2878688);
        mock.keys.insert(2878688, vec![101, 102, 103, 104]);
        mock.records.insert(
            101,
            json!({"decimalLatitude": 51.5, "decimalLongitude": -0.12,
                   "coordinateUncertaintyInMeters": 25, "basisOfRecord": "HUMAN_OBSERVATION"}),
        );
        mock.records.insert(
            102,
            json!({"decimalLongitude": -1.0, "coordinateUncertaintyInMeters": 10}),
        );
        mock.records.insert(
            103,
            json!({"decimalLatitude": 52.2, "decimalLongitude": 0.11,
                   "coordinateUncertaintyInMeters": 150000, "elevation": "n/a"}),
        );
        mock.records.insert(
            104,
            json!({"decimalLatitude": 53.0, "decimalLongitude": -2.0}),
        );
        mock
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    fn bump(&self) {
        *self.calls.lock().unwrap() += 1;
    }
}

impl GbifClient for MockGbif {
    fn match_species(&self, name: &SpeciesName) -> Result<Option<TaxonKey>, OccError> {
        self.bump();
        Ok(self.taxa.get(name.as_str()).copied().map(TaxonKey::new))
    }

    fn search_occurrences(
        &self,
        taxon_key: TaxonKey,
        _filters: &OccurrenceFilters,
        offset: usize,
        limit: usize,
    ) -> Result<OccurrencePage, OccError> {
        self.bump();
        let all = self.keys.get(&taxon_key.get()).cloned().unwrap_or_default();
        let end = (offset + limit.min(2)).min(all.len());
        let start = offset.min(end);
        Ok(OccurrencePage {
            keys: all[start..end].iter().copied().map(OccurrenceKey::new).collect(),
            end_of_records: end >= all.len(),
        })
    }

    fn fetch_occurrence(&self, key: OccurrenceKey) -> Result<Value, OccError> {
        self.bump();
        self.records
            .get(&key.get())
            .cloned()
            .ok_or_else(|| OccError::GbifStatus {
                status: 404,
                message: "not found".to_string(),
            })
    }
}

fn store_in(temp: &tempfile::TempDir) -> Store {
    let project_root = Utf8PathBuf::from_path_buf(temp.path().join("project")).unwrap();
    let cache_root = Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap();
    Store::new_with_paths(project_root, cache_root)
}

fn oak_query() -> QuerySpec {
    let filters = OccurrenceFilters {
        country: "GB".to_string(),
        has_coordinate: "True".to_string(),
        ..OccurrenceFilters::default()
    };
    QuerySpec::new(vec!["Quercus robur".parse().unwrap()], filters).unwrap()
}

#[test]
fn acquire_downloads_then_reuses_project_report() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(store_in(&temp), MockGbif::oaks());
    let query = oak_query();

    let first = app
        .acquire(&query, Some("oaks"), AcquireOptions::default(), &JsonOutput)
        .unwrap();
    assert_eq!(first.action, "download");
    assert_eq!(first.records, Some(4));
    assert_eq!(first.species_resolved, Some(1));

    let store = app.store();
    let fp = fingerprint(&query);
    assert!(Store::exists(&store.project_geodata_path(&fp)));
    assert!(Store::exists(&store.cache_geodata_path(&fp)));
    let meta = Store::read_metadata(&store.cache_metadata_path(&fp)).unwrap();
    assert_eq!(meta.records, 4);
    assert_eq!(meta.search_name.as_deref(), Some("oaks"));

    let second = app
        .acquire(&query, None, AcquireOptions::default(), &JsonOutput)
        .unwrap();
    assert_eq!(second.action, "project");
    assert_eq!(second.records, Some(4));
}

#[test]
fn acquire_prefers_cache_over_download() {
    let temp = tempfile::tempdir().unwrap();
    let store = store_in(&temp);
    let query = oak_query();
    let cache_path = store.cache_geodata_path(&fingerprint(&query));
    let table = "species_name,taxon_key,occurrence_key,basis_of_record,institution_code,\
coordinate_system,decimal_longitude,decimal_latitude,coordinate_uncertainty,elevation,date,issues
Quercus robur,2878688,101,,,,-0.12,51.5,25,,,
Quercus robur,2878688,103,,,,0.11,52.2,,,,
";
    Store::write_bytes_atomic(&cache_path, table.as_bytes()).unwrap();

    let app = App::new(store, MockGbif::oaks());
    let result = app
        .acquire(&query, None, AcquireOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(result.action, "cache");
    assert_eq!(result.records, Some(2));
    assert_eq!(app.client().calls(), 0);
    let fp = fingerprint(&query);
    assert!(Store::exists(&app.store().project_geodata_path(&fp)));
    // no cache sidecar exists, so the row count comes from the table itself
    let meta = Store::read_metadata(&app.store().project_metadata_path(&fp)).unwrap();
    assert_eq!(meta.records, 2);
}

#[test]
fn dry_run_touches_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(store_in(&temp), MockGbif::oaks());
    let options = AcquireOptions {
        dry_run: true,
        ..AcquireOptions::default()
    };

    let result = app.acquire(&oak_query(), None, options, &JsonOutput).unwrap();
    assert_eq!(result.action, "download");
    assert_eq!(result.cache_path, None);
    assert!(!temp.path().join("project").exists());
    assert!(!temp.path().join("cache").exists());
}

#[test]
fn identical_queries_give_identical_tables() {
    let query = oak_query();
    let mut tables = Vec::new();
    for _ in 0..2 {
        let temp = tempfile::tempdir().unwrap();
        let app = App::new(store_in(&temp), MockGbif::oaks());
        let options = AcquireOptions {
            workers: 3,
            ..AcquireOptions::default()
        };
        let result = app.acquire(&query, None, options, &JsonOutput).unwrap();
        let path = result.project_path.unwrap();
        tables.push((result.fingerprint, std::fs::read(path).unwrap()));
    }
    assert_eq!(tables[0], tables[1]);
}

#[test]
fn filter_drops_rows_missing_coordinates() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(store_in(&temp), MockGbif::oaks());
    let query = oak_query();
    app.acquire(&query, None, AcquireOptions::default(), &JsonOutput)
        .unwrap();

    let result = app
        .filter(&query, FilterOptions::default(), &JsonOutput)
        .unwrap();
    assert_eq!(result.rows_in, 4);
    // 102 lacks latitude, 104 lacks uncertainty
    assert_eq!(result.rows_out, 2);
    assert_eq!(
        result.passes[0].missing,
        MissingValues::PartiallyMissing(vec![1])
    );
    assert_eq!(result.passes[1].missing, MissingValues::NoneMissing);
    assert_eq!(
        result.passes[2].missing,
        MissingValues::PartiallyMissing(vec![2])
    );

    let written = std::fs::read_to_string(&result.output_path).unwrap();
    let lines = written.lines().collect::<Vec<_>>();
    assert_eq!(lines[0], "species_name,latitude,longitude,uncertainty");
    assert_eq!(lines[1], "Quercus robur,51.5,-0.12,25");
    assert_eq!(lines.len(), 3);
}

#[test]
fn filter_applies_precision_threshold() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(store_in(&temp), MockGbif::oaks());
    let query = oak_query();
    app.acquire(&query, None, AcquireOptions::default(), &JsonOutput)
        .unwrap();

    let options = FilterOptions {
        max_uncertainty: Some(100_000.0),
    };
    let result = app.filter(&query, options, &JsonOutput).unwrap();
    assert_eq!(result.low_precision_dropped, Some(1));
    assert_eq!(result.rows_out, 1);
}

#[test]
fn filter_without_cached_table_fails() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(store_in(&temp), MockGbif::default());
    let err = app
        .filter(&oak_query(), FilterOptions::default(), &JsonOutput)
        .unwrap_err();
    assert_matches!(err, OccError::DatasetNotFound(_));
}

#[test]
fn list_and_info_report_cached_tables() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(store_in(&temp), MockGbif::oaks());
    let query = oak_query();
    app.acquire(&query, Some("oaks"), AcquireOptions::default(), &JsonOutput)
        .unwrap();

    let listed = app.list(&JsonOutput).unwrap();
    assert_eq!(listed.datasets.len(), 1);
    assert!(listed.datasets[0].project_path.is_some());
    assert!(listed.datasets[0].cache_path.is_some());

    let fp = fingerprint(&query);
    let info = app.info(&fp, &JsonOutput).unwrap();
    assert_eq!(info.metadata.fingerprint, fp);
    assert_eq!(info.metadata.filters.country, "GB");

    app.clear(&JsonOutput).unwrap();
    let info = app.info(&fp, &JsonOutput).unwrap();
    assert!(info.project_path.is_none());
    assert!(info.cache_path.is_some());
}

#[test]
fn unresolved_species_yield_empty_table() {
    let temp = tempfile::tempdir().unwrap();
    let mock = MockGbif::default();
    let app = App::new(store_in(&temp), mock);
    let result = app
        .acquire(&oak_query(), None, AcquireOptions::default(), &JsonOutput)
        .unwrap();
    assert_eq!(result.records, Some(0));
    assert_eq!(result.species_resolved, Some(0));
}

#[test]
fn cached_acquire_makes_no_remote_calls() {
    let temp = tempfile::tempdir().unwrap();
    let query = oak_query();
    App::new(store_in(&temp), MockGbif::oaks())
        .acquire(&query, None, AcquireOptions::default(), &JsonOutput)
        .unwrap();

    let cached = App::new(store_in(&temp), MockGbif::oaks());
    cached
        .acquire(&query, None, AcquireOptions::default(), &JsonOutput)
        .unwrap();
    assert_eq!(cached.client().calls(), 0);

    let forced = App::new(store_in(&temp), MockGbif::oaks());
    let options = AcquireOptions {
        force: true,
        ..AcquireOptions::default()
    };
    forced.acquire(&query, None, options, &JsonOutput).unwrap();
    // one match, two search pages, four records
    assert_eq!(forced.client().calls(), 7);
}
