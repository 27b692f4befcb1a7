//! Tests for archive entry naming, writing and reading

use super::*;
use crate::model::XRefSpec;
use std::io::Cursor;

fn map_with(specs: &[(&str, &str)], redirections: &[(Option<&str>, &str)]) -> XRefMap {
    XRefMap {
        references: Some(
            specs
                .iter()
                .map(|(uid, href)| XRefSpec::new(*uid, *href))
                .collect(),
        ),
        redirections: redirections
            .iter()
            .map(|(prefix, href)| XRefMapRedirection::new(prefix.map(str::to_string), *href))
            .collect(),
        ..Default::default()
    }
}

fn reopen(writer: XRefArchiveWriter<Cursor<Vec<u8>>>) -> XRefArchive {
    let mut sink = writer.finish().unwrap();
    sink.set_position(0);
    XRefArchive::from_reader(sink).unwrap()
}

#[test]
fn test_entry_name_rules() {
    assert_eq!(entry_name("dotnet").unwrap(), "dotnet.yml");
    assert_eq!(entry_name("dotnet.yml").unwrap(), "dotnet.yml");
    assert_eq!(entry_name("Dotnet.YAML").unwrap(), "Dotnet.YAML");
    assert_eq!(entry_name("  spaced ").unwrap(), "spaced.yml");
    for bad in ["", " ", "..", "a/b", "a\\b", "what?", "c:map", "tab\there"] {
        assert!(
            matches!(entry_name(bad), Err(BuildonomyError::Archive(_))),
            "'{bad}' should be rejected"
        );
    }
}

#[test]
fn test_major_entry_is_written_once() {
    let writer = XRefArchiveWriter::new(Cursor::new(Vec::new()));
    let map = map_with(&[("A", "a.html")], &[]);
    assert_eq!(writer.create_major(&map).unwrap(), MAJOR_ENTRY_NAME);
    assert!(matches!(
        writer.create_major(&map),
        Err(BuildonomyError::Archive(_))
    ));
    assert_eq!(writer.entries(), vec![MAJOR_ENTRY_NAME.to_string()]);
}

/// Minor entries take the first *available* candidate, and fall back to a generated name once
/// every candidate is taken; the same candidate twice never yields two entries of one name.
#[test]
fn test_minor_entry_names_are_unique() {
    let writer = XRefArchiveWriter::new(Cursor::new(Vec::new()));
    let map = map_with(&[], &[]);

    let first = writer.create_minor(&map, ["shared"]).unwrap();
    assert_eq!(first, "shared.yml");

    let second = writer.create_minor(&map, ["SHARED.yml", "backup"]).unwrap();
    assert_eq!(second, "backup.yml");

    let third = writer.create_minor(&map, ["shared", "Backup"]).unwrap();
    assert_ne!(third.to_ascii_lowercase(), "shared.yml");
    assert_ne!(third.to_ascii_lowercase(), "backup.yml");
    assert!(third.ends_with(".yml"));

    // The major name is never handed out to a minor entry.
    let fourth = writer.create_minor(&map, [MAJOR_ENTRY_NAME]).unwrap();
    assert_ne!(fourth, MAJOR_ENTRY_NAME);

    let no_candidates = writer.create_minor(&map, Vec::<String>::new()).unwrap();

    let names = writer.entries();
    let unique = names
        .iter()
        .map(|n| n.to_ascii_lowercase())
        .collect::<HashSet<_>>();
    assert_eq!(unique.len(), names.len());
    assert!(names.contains(&no_candidates));
}

#[test]
fn test_entry_names_ignore_non_ascii_case() {
    let writer = XRefArchiveWriter::new(Cursor::new(Vec::new()));
    let upper = writer
        .create_minor(&map_with(&[("Upper", "upper.html")], &[]), ["Ä"])
        .unwrap();
    assert_eq!(upper, "Ä.yml");
    let lower = writer
        .create_minor(&map_with(&[], &[]), ["ä", "fallback"])
        .unwrap();
    assert_eq!(lower, "fallback.yml");
    assert!(writer.has_entry("ä.yml"));

    writer
        .create_major(&map_with(&[], &[(None, "ä.YML")]))
        .unwrap();
    let archive = reopen(writer);
    assert!(archive.has_entry("ä.yml"));
    assert_eq!(archive.reader().find("Upper").unwrap().href, "upper.html");
}

#[test]
fn test_invalid_candidate_is_an_error() {
    let writer = XRefArchiveWriter::new(Cursor::new(Vec::new()));
    let result = writer.create_minor(&map_with(&[], &[]), ["nested/path"]);
    assert!(matches!(result, Err(BuildonomyError::Archive(_))));
    assert!(writer.entries().is_empty());
}

#[test]
fn test_reservations_must_be_written() {
    let writer = XRefArchiveWriter::new(Cursor::new(Vec::new()));
    let name = writer.reserve_minor(["later"]).unwrap();
    assert!(!writer.has_entry(&name));
    // A reserved name is no longer available to others.
    assert_ne!(writer.reserve_minor(["later"]).unwrap(), name);
    assert!(writer.write_reserved("never-reserved.yml", &XRefMap::default()).is_err());
    writer.create_major(&XRefMap::default()).unwrap();
    assert!(matches!(writer.finish(), Err(BuildonomyError::Archive(_))));
}

#[test]
fn test_finish_requires_major() {
    let writer = XRefArchiveWriter::new(Cursor::new(Vec::new()));
    writer.create_minor(&XRefMap::default(), ["only"]).unwrap();
    assert!(matches!(writer.finish(), Err(BuildonomyError::Archive(_))));
}

#[test]
fn test_major_round_trip() {
    let mut original = map_with(
        &[
            ("Zeta", "https://docs.example.org/zeta.html"),
            ("Alpha", "https://docs.example.org/alpha.html"),
            ("Mid", "https://docs.example.org/mid.html"),
        ],
        &[],
    );
    original.sort();
    let writer = XRefArchiveWriter::new(Cursor::new(Vec::new()));
    writer.create_major(&original).unwrap();
    let archive = reopen(writer);

    assert!(archive.is_embedded_redirections());
    assert_eq!(archive.get_major().unwrap(), original);
    for spec in original.references.as_ref().unwrap() {
        assert_eq!(archive.reader().find(&spec.uid).as_ref(), Some(spec));
    }
    assert!(archive.reader().find("Omega").is_none());
}

#[test]
fn test_reader_follows_entry_redirections() {
    let writer = XRefArchiveWriter::new(Cursor::new(Vec::new()));
    let system = writer
        .create_minor(
            &map_with(&[("System.String", "string.html")], &[(None, MAJOR_ENTRY_NAME)]),
            ["System"],
        )
        .unwrap();
    let rest = writer
        .create_minor(&map_with(&[("Other.Type", "other.html")], &[]), ["rest"])
        .unwrap();
    let rest_upper = rest.to_uppercase();
    writer
        .create_major(&map_with(
            &[("Root.Type", "root.html")],
            &[(Some("System."), system.as_str()), (None, rest_upper.as_str())],
        ))
        .unwrap();
    let archive = reopen(writer);

    assert_eq!(archive.entries().len(), 3);
    assert!(archive.has_entry("SYSTEM.YML"));
    assert_eq!(archive.redirections().len(), 2);

    let reader = archive.reader();
    assert_eq!(reader.find("Root.Type").unwrap().href, "root.html");
    assert_eq!(reader.find("System.String").unwrap().href, "string.html");
    // Redirection hrefs resolve entry names ignoring case.
    assert_eq!(reader.find("Other.Type").unwrap().href, "other.html");
    // system.yml redirects back to the major entry; the cycle terminates.
    assert!(reader.find("System.Missing").is_none());
}

#[test]
fn test_archive_requires_major_entry() {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("other.yml", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"references: []\n").unwrap();
    let mut sink = zip.finish().unwrap();
    sink.set_position(0);
    assert!(matches!(
        XRefArchive::from_reader(sink),
        Err(BuildonomyError::Archive(_))
    ));
}

#[test]
fn test_cache_is_bounded_and_evicts_least_recently_used() {
    let writer = XRefArchiveWriter::new(Cursor::new(Vec::new()));
    let mut redirections = Vec::new();
    for idx in 0..3 {
        let uid = format!("Uid.{idx}");
        let href = format!("{idx}.html");
        let name = writer
            .create_minor(
                &map_with(&[(uid.as_str(), href.as_str())], &[]),
                [format!("minor{idx}")],
            )
            .unwrap();
        redirections.push(name);
    }
    let major = XRefMap {
        redirections: redirections
            .iter()
            .map(|name| XRefMapRedirection::new(None, name.clone()))
            .collect(),
        ..Default::default()
    };
    writer.create_major(&major).unwrap();
    let mut sink = writer.finish().unwrap();
    sink.set_position(0);

    let archive = XRefArchive::with_cache_capacity(sink, 2).unwrap();
    let source = archive.archive_reader().source();
    // Opening loads the major entry.
    assert!(source.cache.lock().contains("xrefmap.yml"));

    assert_eq!(archive.reader().find("Uid.2").unwrap().href, "2.html");
    let cache = source.cache.lock();
    assert_eq!(cache.len(), 2);
    assert!(cache.contains("minor2.yml"));
    drop(cache);

    // A corrupt or missing entry is simply not found.
    assert!(source.get_map("absent.yml").is_none());
}

#[test]
fn test_archive_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("refs.zip");
    let writer = XRefArchiveWriter::create(&path).unwrap();
    writer
        .create_major(&map_with(&[("On.Disk", "disk.html")], &[]))
        .unwrap();
    writer.finish().unwrap();

    let archive = XRefArchive::open(&path).unwrap();
    assert_eq!(archive.reader().find("On.Disk").unwrap().href, "disk.html");
}
