//! First-install seeding of the alias master from host species data.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::text::normalise;
use crate::types::{
    species_id_cmp, AliasData, AliasMaster, AliasSource, SpeciesEntry, SpeciesInfo,
};

/// Builds a master from the site's allowed species.
///
/// Every species gets its canonical name as the first alias and, when the
/// tile label normalises differently, the tilename as a second alias.
/// Output ordering is deterministic (numeric-aware id ordering, duplicates
/// dropped), so identical inputs produce byte-identical master JSON.
pub fn seed_from_species(
    site_species: &[String],
    species_map: &BTreeMap<String, SpeciesInfo>,
    timestamp: DateTime<Utc>,
) -> AliasMaster {
    let mut ids: Vec<&String> = site_species.iter().collect();
    ids.sort_by(|a, b| species_id_cmp(a, b));
    ids.dedup();

    let mut master = AliasMaster::new(timestamp);
    for id in ids {
        let Some(info) = species_map.get(id.as_str()) else {
            continue;
        };
        let mut aliases = vec![AliasData::derive(
            &info.canonical,
            AliasSource::SeedCanonical,
            None,
        )];
        if let Some(tilename) = &info.tilename {
            let tile_norm = normalise(tilename);
            if !tile_norm.is_empty() && !aliases.iter().any(|a| a.norm == tile_norm) {
                aliases.push(AliasData::derive(tilename, AliasSource::SeedTilename, None));
            }
        }
        master.species.push(SpeciesEntry {
            species_id: id.clone(),
            canonical: info.canonical.clone(),
            tilename: info.tilename.clone(),
            aliases,
        });
    }
    master
}
