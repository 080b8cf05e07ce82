//! Set / get / delete / size-tracking tests.

#[cfg(test)]
mod tests {
    use crate::memtable::{Memtable, MemtableError};
    use tempfile::TempDir;

    #[test]
    fn set_then_get() {
        let tmp = TempDir::new().unwrap();
        let memtable = Memtable::open(tmp.path(), true).unwrap();

        memtable.set(b"name".to_vec(), b"alice".to_vec()).unwrap();
        let entry = memtable.get(b"name").unwrap().unwrap();
        assert_eq!(entry.value, b"alice");
        assert!(!entry.tombstone);
    }

    #[test]
    fn missing_key_is_none() {
        let tmp = TempDir::new().unwrap();
        let memtable = Memtable::open(tmp.path(), true).unwrap();
        assert!(memtable.get(b"ghost").unwrap().is_none());
    }

    #[test]
    fn overwrite_keeps_latest_value() {
        let tmp = TempDir::new().unwrap();
        let memtable = Memtable::open(tmp.path(), true).unwrap();

        memtable.set(b"k".to_vec(), b"v1".to_vec()).unwrap();
        memtable.set(b"k".to_vec(), b"v2".to_vec()).unwrap();

        assert_eq!(memtable.get(b"k").unwrap().unwrap().value, b"v2");
        assert_eq!(memtable.len(), 1);
    }

    #[test]
    fn delete_leaves_a_tombstone() {
        let tmp = TempDir::new().unwrap();
        let memtable = Memtable::open(tmp.path(), true).unwrap();

        memtable.set(b"k".to_vec(), b"v".to_vec()).unwrap();
        memtable.delete(b"k".to_vec()).unwrap();

        let entry = memtable.get(b"k").unwrap().unwrap();
        assert!(entry.tombstone);
    }

    #[test]
    fn delete_of_absent_key_still_records_tombstone() {
        let tmp = TempDir::new().unwrap();
        let memtable = Memtable::open(tmp.path(), true).unwrap();

        memtable.delete(b"never-set".to_vec()).unwrap();
        assert!(memtable.get(b"never-set").unwrap().unwrap().tombstone);
    }

    #[test]
    fn empty_key_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let memtable = Memtable::open(tmp.path(), true).unwrap();

        assert!(matches!(
            memtable.set(Vec::new(), b"v".to_vec()),
            Err(MemtableError::EmptyKey)
        ));
        assert!(matches!(
            memtable.delete(Vec::new()),
            Err(MemtableError::EmptyKey)
        ));
    }

    #[test]
    fn versions_increase_per_mutation() {
        let tmp = TempDir::new().unwrap();
        let memtable = Memtable::open(tmp.path(), true).unwrap();

        memtable.set(b"a".to_vec(), b"1".to_vec()).unwrap();
        memtable.set(b"b".to_vec(), b"2".to_vec()).unwrap();
        memtable.delete(b"a".to_vec()).unwrap();

        let a = memtable.get(b"a").unwrap().unwrap();
        let b = memtable.get(b"b").unwrap().unwrap();
        assert!(a.version > b.version, "tombstone must be newest for key a");
    }

    #[test]
    fn size_grows_with_inserts_and_tracks_overwrites() {
        let tmp = TempDir::new().unwrap();
        let memtable = Memtable::open(tmp.path(), true).unwrap();
        assert_eq!(memtable.size(), 0);

        memtable.set(b"k".to_vec(), b"0123456789".to_vec()).unwrap();
        let after_insert = memtable.size();
        assert!(after_insert > 10);

        // Shrinking the value shrinks the counter by the difference.
        memtable.set(b"k".to_vec(), b"01234".to_vec()).unwrap();
        assert_eq!(memtable.size(), after_insert - 5);
    }

    #[test]
    fn all_returns_sorted_snapshot_with_tombstones() {
        let tmp = TempDir::new().unwrap();
        let memtable = Memtable::open(tmp.path(), true).unwrap();

        memtable.set(b"c".to_vec(), b"3".to_vec()).unwrap();
        memtable.set(b"a".to_vec(), b"1".to_vec()).unwrap();
        memtable.delete(b"b".to_vec()).unwrap();

        let all = memtable.all().unwrap();
        let keys: Vec<&[u8]> = all.iter().map(|e| e.key.as_slice()).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b", b"c"]);
        assert!(all[1].tombstone);
    }
}
