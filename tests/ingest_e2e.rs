//! End-to-end ingestion tests against the in-memory stores.
//!
//! These cover behavior that only shows up across a whole pass:
//! - many spellings of one person collapsing to one entity
//! - ledger completeness across repeated passes
//! - aggregates recomputed from the ledger matching the run summary
//! - source files of every supported format

use std::fs;
use std::path::Path;

use tempfile::tempdir;

use factfold::aggregate::recompute_all;
use factfold::{
    AliasTable, Confidence, EntityKind, Fact, FactReader, IdentityResolver, IngestEngine,
    MentionContext, OriginKind, Provenance, RawKey, SourceSpec, Value,
};

fn engine() -> IngestEngine {
    IngestEngine::in_memory(IdentityResolver::with_aliases(AliasTable::documentary_defaults()))
}

fn person(raw: &str, confidence: f32, line: usize) -> Fact {
    Fact::builder(EntityKind::Person, RawKey::text(raw))
        .confidence(Confidence::new(confidence).unwrap())
        .provenance(Provenance::new(OriginKind::Subtitle, "s01e01.jsonl").at_line(line))
        .context(MentionContext::in_episode(1, 1))
        .build()
        .unwrap()
}

fn write(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).unwrap();
}

#[test]
fn test_interleaved_spellings_collapse_to_one_person() {
    let mut engine = engine();
    let facts: Vec<Fact> = (0..1000)
        .map(|i| {
            let raw = if i % 2 == 0 { "Rick" } else { "Rick Lagina" };
            person(raw, 0.8, i)
        })
        .collect();

    let summary = engine.ingest_facts("subtitles", facts).into_result().unwrap();

    assert_eq!(engine.canonical_store().count(EntityKind::Person).unwrap(), 1);
    let rows = engine
        .mention_ledger()
        .mentions_for(EntityKind::Person, "rick_lagina")
        .unwrap();
    assert_eq!(rows.len(), 1000);
    assert_eq!(summary.totals.processed, 1000);
    assert_eq!(summary.totals.inserted, 1);
    assert_eq!(summary.entities[&EntityKind::Person], 1);
    assert_eq!(summary.mentions, 1000);

    let rick = engine
        .canonical_store()
        .get(EntityKind::Person, "rick_lagina")
        .unwrap()
        .unwrap();
    assert!(rick.observed_names.contains("Rick"));
    assert!(rick.observed_names.contains("Rick Lagina"));
}

#[test]
fn test_every_pass_appends_every_mention() {
    let mut engine = engine();
    let batch = || {
        vec![
            person("Marty", 0.7, 1),
            person("Marty Lagina", 0.9, 2),
            person("Gary Drayton", 0.8, 3),
            person("Gary", 0.6, 4),
            person("Laird Niven", 0.8, 5),
        ]
    };

    let mut first_count = None;
    for pass in 1..=3_usize {
        let summary = engine.ingest_facts("people", batch()).into_result().unwrap();
        let ledger = engine.mention_ledger();
        assert_eq!(ledger.len().unwrap(), 5 * pass);
        assert_eq!(ledger.mentions_for(EntityKind::Person, "marty_lagina").unwrap().len(), 2 * pass);
        assert_eq!(summary.aggregates[&EntityKind::Person]["marty_lagina"].mention_count, 2 * pass as u64);

        // Re-ingesting never creates entities.
        let count = engine.canonical_store().count(EntityKind::Person).unwrap();
        assert_eq!(*first_count.get_or_insert(count), count);
        if pass > 1 {
            assert_eq!(summary.totals.inserted, 0);
        }
    }
}

#[test]
fn test_aggregates_match_a_fresh_recompute() {
    let mut engine = engine();
    let facts = (0..60)
        .map(|i| {
            let raw = ["Rick", "Marty", "Craig Tester"][i % 3];
            Fact::builder(EntityKind::Person, RawKey::text(raw))
                .provenance(Provenance::new(OriginKind::Subtitle, format!("s{:02}.jsonl", i % 4)).at_line(i))
                .context(MentionContext::in_episode(u32::try_from(i % 4).unwrap() + 1, 1))
                .build()
                .unwrap()
        })
        .collect();
    let summary = engine.ingest_facts("subtitles", facts).into_result().unwrap();

    let recomputed = recompute_all(engine.mention_ledger().as_ref()).unwrap();
    assert_eq!(recomputed, summary.aggregates);
    assert_eq!(recompute_all(engine.mention_ledger().as_ref()).unwrap(), recomputed);

    let rick = &recomputed[&EntityKind::Person]["rick_lagina"];
    assert_eq!(rick.mention_count, 20);
    assert_eq!(rick.first_season, Some(1));
    assert_eq!(rick.last_season, Some(4));
}

#[test]
fn test_higher_confidence_wins_in_either_order() {
    let digger = Fact::builder(EntityKind::Person, RawKey::text("Jack Begley"))
        .attribute("role", "digger")
        .confidence(Confidence::new(0.6).unwrap())
        .build()
        .unwrap();
    let researcher = Fact::builder(EntityKind::Person, RawKey::text("Jack Begley"))
        .attribute("role", "researcher")
        .confidence(Confidence::new(0.9).unwrap())
        .build()
        .unwrap();

    for order in [vec![digger.clone(), researcher.clone()], vec![researcher.clone(), digger.clone()]] {
        let mut engine = engine();
        engine.ingest_facts("people", order).into_result().unwrap();
        let jack = engine
            .canonical_store()
            .get(EntityKind::Person, "jack_begley")
            .unwrap()
            .unwrap();
        assert_eq!(jack.attribute("role"), Some(&Value::from("researcher")));
    }
}

#[test]
fn test_sources_of_every_format() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "people.jsonl",
        concat!(
            r#"{"person": "Marty", "confidence": 0.7, "season": 1, "episode": 1}"#,
            "\n",
            r#"{"person": "Marty Lagina", "confidence": 0.95, "season": 1, "episode": 2}"#,
            "\n",
            "{not json\n",
        ),
    );
    write(
        dir.path(),
        "episodes.json",
        r#"{"seasons": [{"season": 1, "episodes": [{"episode": 1, "title": "Dead Man's Chest"}, {"episode": 2, "title": "Sealed Fate"}]}]}"#,
    );
    write(dir.path(), "theories.json", r#"[{"theory": "Templar", "confidence": 0.8}]"#);
    write(
        dir.path(),
        "boreholes.csv",
        "borehole_id,max_depth_m,confidence,source_refs\n10X,235,0.99,manual;override.csv\n",
    );

    let mut engine = engine();
    let outcome = engine.ingest(&[SourceSpec::required(dir.path())]);
    let summary = outcome.into_result().unwrap();

    assert_eq!(summary.sources.len(), 1);
    let source = &summary.sources[0];
    assert_eq!(source.files, 4);
    assert_eq!(source.malformed, 1);
    assert_eq!(summary.totals.malformed, 1);
    assert_eq!(summary.totals.facts, 6);

    let store = engine.canonical_store();
    let marty = store.get(EntityKind::Person, "marty_lagina").unwrap().unwrap();
    assert_eq!(marty.attribute("name"), Some(&Value::from("Marty Lagina")));

    assert_eq!(store.count(EntityKind::Episode).unwrap(), 2);
    let episode = store.get(EntityKind::Episode, "s01e02").unwrap().unwrap();
    assert_eq!(episode.attribute("title"), Some(&Value::from("Sealed Fate")));

    let templar = store.get(EntityKind::Theory, "templar").unwrap().unwrap();
    assert_eq!(templar.attribute("theory_type"), Some(&Value::from("religious")));

    let borehole = store.get(EntityKind::Borehole, "10x").unwrap().unwrap();
    assert!(matches!(borehole.attribute("max_depth_m"), Some(Value::Float(d)) if (*d - 235.0).abs() < 1e-9));
    assert!(borehole.source_refs.contains("manual"));
    assert!(borehole.source_refs.contains("override.csv"));
}

#[test]
fn test_missing_optional_source_is_reported_not_fatal() {
    let dir = tempdir().unwrap();
    write(dir.path(), "people.jsonl", "{\"person\": \"Rick\"}\n");

    let mut engine = engine();
    let summary = engine
        .ingest(&[
            SourceSpec::required(dir.path().join("people.jsonl")),
            SourceSpec::optional(dir.path().join("artifacts.jsonl")),
        ])
        .into_result()
        .unwrap();

    assert_eq!(summary.totals.missing_sources, 1);
    assert!(summary.sources[1].missing);
    assert_eq!(summary.mentions, 1);
}

#[test]
fn test_missing_required_source_aborts_before_writing() {
    let dir = tempdir().unwrap();
    write(dir.path(), "people.jsonl", "{\"person\": \"Rick\"}\n");

    let mut engine = engine();
    let outcome = engine.ingest(&[
        SourceSpec::optional(dir.path().join("people.jsonl")),
        SourceSpec::required(dir.path().join("locations.jsonl")),
    ]);

    let err = outcome.error.as_ref().unwrap();
    assert!(err.is_missing_required_source());
    assert!(outcome.summary.error.is_some());
    assert!(engine.mention_ledger().is_empty().unwrap());
    assert_eq!(engine.canonical_store().count(EntityKind::Person).unwrap(), 0);
}

#[test]
fn test_parallel_reader_gives_the_same_store() {
    let dir = tempdir().unwrap();
    for season in 1..=4 {
        let lines: String = (1..=25)
            .map(|i| {
                let name = ["Rick", "Marty", "Gary Drayton", "Dan Blankenship", "Alex Lagina"][i % 5];
                format!("{{\"person\": \"{name}\", \"season\": {season}, \"episode\": {i}}}\n")
            })
            .collect();
        write(dir.path(), &format!("people_s{season}.jsonl"), &lines);
    }
    let specs: Vec<SourceSpec> = (1..=4)
        .map(|s| SourceSpec::required(dir.path().join(format!("people_s{s}.jsonl"))))
        .collect();

    let mut sequential = engine();
    let a = sequential.ingest(&specs).into_result().unwrap();
    let mut parallel = engine().with_reader(FactReader::new().with_workers(4));
    let b = parallel.ingest(&specs).into_result().unwrap();

    assert_eq!(a.aggregates, b.aggregates);
    assert_eq!(a.entities, b.entities);
    assert_eq!(a.totals, b.totals);
}
