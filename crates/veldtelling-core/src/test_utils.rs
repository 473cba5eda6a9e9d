//! Shared fixtures for unit tests.

use std::collections::BTreeMap;

use crate::types::{
    AliasData, AliasMaster, AliasSource, MatchContext, SpeciesEntry, SpeciesInfo,
};

/// A species entry with its canonical alias, optional tilename alias and any
/// extra user-trained aliases.
pub fn species(
    id: &str,
    canonical: &str,
    tilename: Option<&str>,
    extra_aliases: &[&str],
) -> SpeciesEntry {
    let mut aliases = vec![AliasData::derive(canonical, AliasSource::SeedCanonical, None)];
    if let Some(tile) = tilename {
        let tile_alias = AliasData::derive(tile, AliasSource::SeedTilename, None);
        if !aliases.iter().any(|a| a.norm == tile_alias.norm) {
            aliases.push(tile_alias);
        }
    }
    for text in extra_aliases {
        aliases.push(AliasData::derive(text, AliasSource::UserFieldTraining, None));
    }
    SpeciesEntry {
        species_id: id.to_owned(),
        canonical: canonical.to_owned(),
        tilename: tilename.map(str::to_owned),
        aliases,
    }
}

/// A master at the Unix epoch, sorted, from the given species.
pub fn master_of(entries: Vec<SpeciesEntry>) -> AliasMaster {
    let mut master = AliasMaster::new(chrono::DateTime::UNIX_EPOCH);
    master.species = entries;
    master.sort_species();
    master
}

/// A match context naming tiles, site-allowed and recent species. Display
/// names come from the master so tests stay in one place.
pub fn context_of(master: &AliasMaster, tiles: &[&str], site: &[&str], recent: &[&str]) -> MatchContext {
    let mut species_by_id = BTreeMap::new();
    for entry in &master.species {
        species_by_id.insert(
            entry.species_id.clone(),
            SpeciesInfo {
                canonical: entry.canonical.clone(),
                tilename: entry.tilename.clone(),
            },
        );
    }
    MatchContext {
        tiles_species_ids: tiles.iter().map(|s| (*s).to_owned()).collect(),
        site_allowed_ids: site.iter().map(|s| (*s).to_owned()).collect(),
        recent_ids: recent.iter().map(|s| (*s).to_owned()).collect(),
        species_by_id: species_by_id.into_iter().collect(),
    }
}
