//! Remote acquisition stages: species → taxon keys → occurrence keys →
//! projected records.
//!
//! Only transport failures (after the client's retries) abort a stage. Lookup
//! misses, failed pages and failed record fetches (bad status or unreadable
//! body) are logged and skipped.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{OccurrenceKey, SpeciesName, TaxonKey};
use crate::error::OccError;
use crate::gbif::{GbifClient, SEARCH_PAGE_SIZE};
use crate::query::OccurrenceFilters;
use crate::record::{OccurrenceRecord, project_record};

pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSpecies {
    pub species: SpeciesName,
    pub taxon_key: TaxonKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeciesOccurrences {
    pub species: SpeciesName,
    pub taxon_key: TaxonKey,
    pub keys: Vec<OccurrenceKey>,
}

/// Resolves each name to its taxon key, one request at a time, in input order.
/// Names without a usable match are left out; repeated names are resolved once.
pub fn resolve<C: GbifClient + ?Sized>(
    client: &C,
    species: &[SpeciesName],
) -> Result<Vec<ResolvedSpecies>, OccError> {
    let mut resolved: Vec<ResolvedSpecies> = Vec::with_capacity(species.len());
    for name in species {
        if resolved.iter().any(|entry| &entry.species == name) {
            warn!(species = %name, "species listed more than once, keeping first");
            continue;
        }
        match client.match_species(name) {
            Ok(Some(taxon_key)) => {
                debug!(species = %name, %taxon_key, "resolved taxon key");
                resolved.push(ResolvedSpecies {
                    species: name.clone(),
                    taxon_key,
                });
            }
            Ok(None) => warn!(species = %name, "no taxon match, species skipped"),
            Err(err) if err.is_bad_response() => {
                warn!(species = %name, error = %err, "taxon lookup failed, species skipped")
            }
            Err(err) => return Err(err),
        }
    }
    Ok(resolved)
}

/// Collects every matching occurrence key per species, following pages until
/// the API reports the end of records. A failed page ends that species' list.
pub fn fetch_keys<C: GbifClient + ?Sized>(
    client: &C,
    taxa: &[ResolvedSpecies],
    filters: &OccurrenceFilters,
) -> Result<Vec<SpeciesOccurrences>, OccError> {
    let mut collected = Vec::with_capacity(taxa.len());
    for taxon in taxa {
        let mut keys = Vec::new();
        let mut offset = 0usize;
        loop {
            let page =
                match client.search_occurrences(taxon.taxon_key, filters, offset, SEARCH_PAGE_SIZE)
                {
                    Ok(page) => page,
                    Err(err) if err.is_bad_response() => {
                        warn!(
                            species = %taxon.species,
                            error = %err,
                            offset,
                            "occurrence search page failed, treating as end of results"
                        );
                        break;
                    }
                    Err(err) => return Err(err),
                };
            let received = page.keys.len();
            keys.extend(page.keys);
            offset += received;
            if page.end_of_records || received == 0 {
                break;
            }
        }
        info!(species = %taxon.species, occurrences = keys.len(), "collected occurrence keys");
        collected.push(SpeciesOccurrences {
            species: taxon.species.clone(),
            taxon_key: taxon.taxon_key,
            keys,
        });
    }
    Ok(collected)
}

/// Fetches one occurrence and projects it. `Ok(None)` when the record could not
/// be retrieved (not found or any other failure status).
pub fn extract<C: GbifClient + ?Sized>(
    client: &C,
    species: &SpeciesName,
    taxon_key: TaxonKey,
    occurrence_key: OccurrenceKey,
) -> Result<Option<OccurrenceRecord>, OccError> {
    match client.fetch_occurrence(occurrence_key) {
        Ok(payload) => Ok(Some(project_record(
            species,
            taxon_key,
            occurrence_key,
            &payload,
        ))),
        Err(err) if err.is_not_found() => {
            warn!(%occurrence_key, species = %species, "occurrence not found, record skipped");
            Ok(None)
        }
        Err(err) if err.is_bad_response() => {
            warn!(
                %occurrence_key,
                species = %species,
                error = %err,
                "occurrence fetch failed, record skipped"
            );
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Extracts every listed occurrence on a pool of `workers` threads. Rows come
/// back in species order, then search order, whatever order fetches finish in.
pub fn extract_all<C: GbifClient + ?Sized>(
    client: &C,
    occurrences: &[SpeciesOccurrences],
    workers: usize,
) -> Result<Vec<OccurrenceRecord>, OccError> {
    let jobs = occurrences
        .iter()
        .flat_map(|entry| {
            entry
                .keys
                .iter()
                .map(move |key| (&entry.species, entry.taxon_key, *key))
        })
        .collect::<Vec<_>>();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|index| format!("gbif-occ-fetch-{index}"))
        .build()
        .map_err(|err| OccError::WorkerPool(err.to_string()))?;

    let fetched = pool.install(|| {
        jobs.par_iter()
            .map(|(species, taxon_key, key)| extract(client, species, *taxon_key, *key))
            .collect::<Result<Vec<_>, OccError>>()
    })?;

    let records = fetched.into_iter().flatten().collect::<Vec<_>>();
    let skipped = jobs.len() - records.len();
    if skipped > 0 {
        warn!(skipped, total = jobs.len(), "some occurrence records were skipped");
    }
    Ok(records)
}
