#![no_main]

use libfuzzer_sys::fuzz_target;

use veldtelling_core::codec::{decode, DATASET_ALIAS_INDEX};
use veldtelling_core::index::IndexSnapshot;
use veldtelling_core::{
    match_hypothesis, AliasData, AliasIndex, AliasMaster, AliasSource, MatchContext, MatchOptions,
    SpeciesEntry,
};

fn snapshot() -> IndexSnapshot {
    let mut master = AliasMaster::new(chrono::DateTime::UNIX_EPOCH);
    for (id, name) in [
        ("20", "Aalscholver"),
        ("30", "Boerenzwaluw"),
        ("1001", "Koolmees"),
        ("2001", "Buizerd"),
    ] {
        master.species.push(SpeciesEntry {
            species_id: id.to_owned(),
            canonical: name.to_owned(),
            tilename: None,
            aliases: vec![AliasData::derive(name, AliasSource::SeedCanonical, None)],
        });
    }
    IndexSnapshot::build(master.to_index())
}

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must never break the container verifier.
    let _ = decode::<AliasIndex>(data, DATASET_ALIAS_INDEX);

    // Arbitrary text must always produce a well-formed match result.
    if let Ok(utterance) = std::str::from_utf8(data) {
        let snapshot = snapshot();
        let context = MatchContext {
            tiles_species_ids: ["20".to_owned()].into_iter().collect(),
            site_allowed_ids: ["20", "30", "1001", "2001"]
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            recent_ids: Default::default(),
            species_by_id: Default::default(),
        };
        let _ = match_hypothesis(&snapshot, utterance, &context, &MatchOptions::default());
    }
});
