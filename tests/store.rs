use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::NaiveDate;

use ecoinvent_fetch::domain::CacheKind;
use ecoinvent_fetch::store::{CATALOGUE_FILE, CacheEntry, CachedStorage};

fn entry(path: &str, kind: CacheKind) -> CacheEntry {
    CacheEntry {
        path: path.to_string(),
        extracted: false,
        created: NaiveDate::from_ymd_opt(2024, 1, 9)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap(),
        archive: None,
        system_model: None,
        version: Some("3.10".to_string()),
        kind,
    }
}

#[test]
fn catalogue_persists_entries() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap();
    let storage = CachedStorage::new(root.clone()).unwrap();
    assert!(root.join(CATALOGUE_FILE).is_file());
    assert!(storage.catalogue().is_empty().unwrap());

    let catalogue = storage.catalogue();
    catalogue
        .set("ecoinvent 3.10_LCIA_implementation.7z", entry("/a", CacheKind::Extra))
        .unwrap();
    catalogue
        .set("ecoinvent 3 report_Energy.pdf", entry("/b", CacheKind::Report))
        .unwrap();

    let reopened = CachedStorage::new(root).unwrap();
    assert_eq!(reopened.catalogue().len().unwrap(), 2);
    assert_eq!(
        reopened.catalogue().keys().unwrap(),
        vec![
            "ecoinvent 3 report_Energy.pdf".to_string(),
            "ecoinvent 3.10_LCIA_implementation.7z".to_string(),
        ]
    );
    let found = reopened
        .catalogue()
        .get("ecoinvent 3 report_Energy.pdf")
        .unwrap()
        .unwrap();
    assert_eq!(found.kind, CacheKind::Report);

    let removed = reopened
        .catalogue()
        .delete("ecoinvent 3 report_Energy.pdf")
        .unwrap();
    assert_matches!(removed, Some(CacheEntry { kind: CacheKind::Report, .. }));
    assert!(!reopened.catalogue().contains("ecoinvent 3 report_Energy.pdf").unwrap());
    assert_eq!(reopened.catalogue().delete("missing").unwrap(), None);
}

#[test]
fn clear_empties_root_and_catalogue() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap();
    let storage = CachedStorage::new(root.clone()).unwrap();
    std::fs::write(root.join("stale.7z").as_std_path(), b"7z").unwrap();
    storage
        .catalogue()
        .set("stale.7z", entry(root.join("stale.7z").as_str(), CacheKind::Release))
        .unwrap();

    storage.clear().unwrap();

    assert!(!root.join("stale.7z").exists());
    assert!(root.join(CATALOGUE_FILE).is_file());
    assert!(storage.catalogue().entries().unwrap().is_empty());
}
