use std::collections::BTreeMap;
use std::fs;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;

use crate::coordinates::{self, PassReport};
use crate::dataset::OccurrenceDataset;
use crate::error::OccError;
use crate::fingerprint::{Fingerprint, fingerprint};
use crate::gbif::GbifClient;
use crate::pipeline::{self, DEFAULT_WORKERS};
use crate::query::QuerySpec;
use crate::store::{Metadata, Store};

#[derive(Debug, Clone)]
pub struct AcquireOptions {
    pub force: bool,
    pub no_cache: bool,
    pub dry_run: bool,
    pub workers: usize,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            force: false,
            no_cache: false,
            dry_run: false,
            workers: DEFAULT_WORKERS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Rows with a coordinate uncertainty above this many meters are dropped.
    pub max_uncertainty: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcquireResult {
    pub fingerprint: Fingerprint,
    pub action: String,
    pub species_requested: usize,
    pub species_resolved: Option<usize>,
    pub records: Option<usize>,
    pub project_path: Option<String>,
    pub cache_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterResult {
    pub fingerprint: Fingerprint,
    pub source_path: String,
    pub rows_in: usize,
    pub rows_out: usize,
    pub passes: Vec<PassReport>,
    pub low_precision_dropped: Option<usize>,
    pub output_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub datasets: Vec<ListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub fingerprint: Fingerprint,
    pub search_name: Option<String>,
    pub species: usize,
    pub records: usize,
    pub project_path: Option<String>,
    pub cache_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub metadata: Metadata,
    pub project_path: Option<String>,
    pub cache_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub cleared: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, message: impl Into<String>) {
    sink.event(ProgressEvent {
        message: message.into(),
        elapsed: None,
    });
}

#[derive(Clone)]
pub struct App<C: GbifClient> {
    store: Store,
    client: C,
}

impl<C: GbifClient> App<C> {
    pub fn new(store: Store, client: C) -> Self {
        Self { store, client }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Produces the occurrence table for `query`, reusing the project report or
    /// the shared cache when a table with the same fingerprint exists.
    pub fn acquire(
        &self,
        query: &QuerySpec,
        search_name: Option<&str>,
        options: AcquireOptions,
        sink: &dyn ProgressSink,
    ) -> Result<AcquireResult, OccError> {
        let fingerprint = fingerprint(query);
        emit(sink, format!("phase=Resolve; query {fingerprint}"));
        if !options.dry_run {
            self.store.ensure_project_root()?;
        }

        let project_path = self.store.project_geodata_path(&fingerprint);
        let cache_path = self.store.cache_geodata_path(&fingerprint);
        let result = |action: &str, records: Option<usize>, species_resolved: Option<usize>| {
            AcquireResult {
                fingerprint: fingerprint.clone(),
                action: action.to_string(),
                species_requested: query.species().len(),
                species_resolved,
                records,
                project_path: Some(project_path.to_string()),
                cache_path: (Store::exists(&cache_path)
                    || (!options.no_cache && !options.dry_run && action == "download"))
                    .then(|| cache_path.to_string()),
            }
        };

        if !options.force && Store::exists(&project_path) {
            emit(sink, "phase=Store; already in project reports");
            let records = self.recorded_rows(&self.store.project_metadata_path(&fingerprint));
            return Ok(result("project", records, None));
        }

        if !options.force && Store::exists(&cache_path) {
            emit(sink, "phase=Store; using cached dataset");
            let records = count_table_rows(&cache_path)?;
            if !options.dry_run {
                Store::copy_file_atomic(&cache_path, &project_path)?;
                let meta = self.build_metadata(
                    &fingerprint,
                    query,
                    search_name,
                    records,
                    project_path.as_str(),
                );
                Store::write_metadata(&self.store.project_metadata_path(&fingerprint), &meta)?;
            }
            return Ok(result("cache", Some(records), None));
        }

        if options.dry_run {
            return Ok(result("download", None, None));
        }

        emit(sink, "phase=Prepare; resolving taxon keys");
        let start = Instant::now();
        let taxa = pipeline::resolve(&self.client, query.species())?;
        emit(
            sink,
            format!("phase=Fetch; searching occurrences for {} species", taxa.len()),
        );
        let occurrences = pipeline::fetch_keys(&self.client, &taxa, query.filters())?;
        let total = occurrences.iter().map(|entry| entry.keys.len()).sum::<usize>();
        emit(
            sink,
            format!("phase=Fetch; fetching {total} occurrence records"),
        );
        let records = pipeline::extract_all(&self.client, &occurrences, options.workers)?;
        let dataset = OccurrenceDataset::assemble(records);
        sink.event(ProgressEvent {
            message: format!("gbif.response records={}", dataset.len()),
            elapsed: Some(start.elapsed()),
        });

        emit(sink, "phase=Store; writing files");
        let bytes = dataset.to_csv_bytes()?;
        Store::write_bytes_atomic(&project_path, &bytes)?;
        let meta = self.build_metadata(
            &fingerprint,
            query,
            search_name,
            dataset.len(),
            project_path.as_str(),
        );
        Store::write_metadata(&self.store.project_metadata_path(&fingerprint), &meta)?;

        if !options.no_cache {
            self.store.ensure_cache_root()?;
            Store::write_bytes_atomic(&cache_path, &bytes)?;
            let meta = self.build_metadata(
                &fingerprint,
                query,
                search_name,
                dataset.len(),
                cache_path.as_str(),
            );
            Store::write_metadata(&self.store.cache_metadata_path(&fingerprint), &meta)?;
        }

        Ok(result("download", Some(dataset.len()), Some(taxa.len())))
    }

    /// Loads the table cached for `query` and removes rows that cannot be
    /// placed on a map. Writes the cleaned coordinates next to the table.
    pub fn filter(
        &self,
        query: &QuerySpec,
        options: FilterOptions,
        sink: &dyn ProgressSink,
    ) -> Result<FilterResult, OccError> {
        let fingerprint = fingerprint(query);
        emit(sink, format!("phase=Resolve; locating {fingerprint}"));
        let source_path = self.locate(&fingerprint)?;

        let file = fs::File::open(source_path.as_std_path())
            .map_err(|err| OccError::Filesystem(format!("open {source_path}: {err}")))?;
        let dataset = OccurrenceDataset::read_csv(file)?;
        let frame = dataset.coordinate_frame();

        emit(sink, "phase=Verify; checking coordinates");
        let (cleaned, report) = coordinates::clean(&frame);
        let (cleaned, low_precision_dropped) = match options.max_uncertainty {
            Some(max_meters) => {
                let before = cleaned.len();
                let filtered = coordinates::filter_uncertainty(&cleaned, max_meters);
                let dropped = before - filtered.len();
                (filtered, Some(dropped))
            }
            None => (cleaned, None),
        };

        emit(sink, "phase=Store; writing coordinates");
        self.store.ensure_project_root()?;
        let output_path = self.store.project_coordinates_path(&fingerprint);
        let mut buffer = Vec::new();
        cleaned.write_csv(&mut buffer)?;
        Store::write_bytes_atomic(&output_path, &buffer)?;

        Ok(FilterResult {
            fingerprint,
            source_path: source_path.to_string(),
            rows_in: frame.len(),
            rows_out: cleaned.len(),
            passes: report.passes,
            low_precision_dropped,
            output_path: output_path.to_string(),
        })
    }

    pub fn list(&self, sink: &dyn ProgressSink) -> Result<ListResult, OccError> {
        emit(sink, "phase=Resolve; scanning stores");

        let project = Store::list_metadata(self.store.project_root())?;
        let cache = Store::list_metadata(self.store.cache_root())?;

        let mut map = BTreeMap::<Fingerprint, ListEntry>::new();
        for (meta, in_project) in project
            .into_iter()
            .map(|meta| (meta, true))
            .chain(cache.into_iter().map(|meta| (meta, false)))
        {
            let entry = map
                .entry(meta.fingerprint.clone())
                .or_insert_with(|| ListEntry {
                    fingerprint: meta.fingerprint.clone(),
                    search_name: meta.search_name.clone(),
                    species: meta.species.len(),
                    records: meta.records,
                    project_path: None,
                    cache_path: None,
                });
            if in_project {
                entry.project_path = Some(meta.resolved_path);
            } else {
                entry.cache_path = Some(meta.resolved_path);
            }
        }

        Ok(ListResult {
            datasets: map.into_values().collect(),
        })
    }

    pub fn info(
        &self,
        fingerprint: &Fingerprint,
        sink: &dyn ProgressSink,
    ) -> Result<InfoResult, OccError> {
        emit(sink, format!("phase=Resolve; looking up {fingerprint}"));

        let project_meta = self.store.project_metadata_path(fingerprint);
        let cache_meta = self.store.cache_metadata_path(fingerprint);
        let project = Store::exists(&project_meta)
            .then(|| Store::read_metadata(&project_meta))
            .transpose()?;
        let cache = Store::exists(&cache_meta)
            .then(|| Store::read_metadata(&cache_meta))
            .transpose()?;

        let project_path = project.as_ref().map(|meta| meta.resolved_path.clone());
        let cache_path = cache.as_ref().map(|meta| meta.resolved_path.clone());
        let metadata = project
            .or(cache)
            .ok_or_else(|| OccError::DatasetNotFound(fingerprint.to_string()))?;

        Ok(InfoResult {
            metadata,
            project_path,
            cache_path,
        })
    }

    pub fn clear(&self, sink: &dyn ProgressSink) -> Result<ClearResult, OccError> {
        emit(sink, "phase=Store; clearing project reports");
        self.store.clear_project()?;
        Ok(ClearResult { cleared: true })
    }

    fn locate(&self, fingerprint: &Fingerprint) -> Result<camino::Utf8PathBuf, OccError> {
        let project_path = self.store.project_geodata_path(fingerprint);
        if Store::exists(&project_path) {
            return Ok(project_path);
        }
        let cache_path = self.store.cache_geodata_path(fingerprint);
        if Store::exists(&cache_path) {
            return Ok(cache_path);
        }
        Err(OccError::DatasetNotFound(fingerprint.geodata_file_name()))
    }

    fn recorded_rows(&self, metadata_path: &Utf8Path) -> Option<usize> {
        Store::read_metadata(metadata_path)
            .ok()
            .map(|meta| meta.records)
    }

    fn build_metadata(
        &self,
        fingerprint: &Fingerprint,
        query: &QuerySpec,
        search_name: Option<&str>,
        records: usize,
        path: &str,
    ) -> Metadata {
        Metadata {
            source: "gbif".to_string(),
            fingerprint: fingerprint.clone(),
            search_name: search_name.map(|name| name.to_string()),
            species: query.species().to_vec(),
            filters: query.filters().clone(),
            records,
            downloaded_at: iso_timestamp(),
            tool: format!("gbif-occ/{}", env!("CARGO_PKG_VERSION")),
            resolved_path: path.to_string(),
        }
    }
}

fn count_table_rows(path: &Utf8Path) -> Result<usize, OccError> {
    let file = fs::File::open(path.as_std_path())
        .map_err(|err| OccError::Filesystem(format!("open {path}: {err}")))?;
    OccurrenceDataset::count_rows(file)
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
