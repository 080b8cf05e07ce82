//! WAL replay and consolidation tests.

#[cfg(test)]
mod tests {
    use crate::memtable::Memtable;
    use crate::wal::Wal;
    use tempfile::TempDir;

    #[test]
    fn reopen_recovers_all_writes() {
        let tmp = TempDir::new().unwrap();
        {
            let memtable = Memtable::open(tmp.path(), true).unwrap();
            memtable.set(b"a".to_vec(), b"1".to_vec()).unwrap();
            memtable.set(b"b".to_vec(), b"2".to_vec()).unwrap();
            memtable.delete(b"a".to_vec()).unwrap();
        }

        let memtable = Memtable::open(tmp.path(), true).unwrap();
        assert!(memtable.get(b"a").unwrap().unwrap().tombstone);
        assert_eq!(memtable.get(b"b").unwrap().unwrap().value, b"2");
    }

    #[test]
    fn recovery_consolidates_into_one_new_wal() {
        let tmp = TempDir::new().unwrap();
        {
            let memtable = Memtable::open(tmp.path(), true).unwrap();
            memtable.set(b"k".to_vec(), b"v".to_vec()).unwrap();
            assert_eq!(memtable.generation(), 1);
        }

        let memtable = Memtable::open(tmp.path(), true).unwrap();
        assert_eq!(memtable.generation(), 2);

        // Exactly one WAL file remains: the new generation.
        let wal_files: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|dirent| Wal::parse_generation(&dirent.unwrap().path()))
            .collect();
        assert_eq!(wal_files, vec![2]);
    }

    #[test]
    fn duplicate_keys_collapse_to_last_write() {
        let tmp = TempDir::new().unwrap();
        {
            let memtable = Memtable::open(tmp.path(), true).unwrap();
            for i in 0..5 {
                memtable
                    .set(b"same".to_vec(), format!("v{i}").into_bytes())
                    .unwrap();
            }
        }

        let memtable = Memtable::open(tmp.path(), true).unwrap();
        assert_eq!(memtable.get(b"same").unwrap().unwrap().value, b"v4");
        assert_eq!(memtable.len(), 1);
    }

    #[test]
    fn multiple_generations_replay_oldest_first() {
        let tmp = TempDir::new().unwrap();

        // Two coexisting WAL generations with conflicting writes; the
        // higher generation must win.
        {
            let old = Wal::open(tmp.path(), 1, true).unwrap();
            old.append(&crate::wal::WalRecord::Set {
                key: b"k".to_vec(),
                value: b"old".to_vec(),
                version: 1,
            })
            .unwrap();

            let new = Wal::open(tmp.path(), 2, true).unwrap();
            new.append(&crate::wal::WalRecord::Set {
                key: b"k".to_vec(),
                value: b"new".to_vec(),
                version: 2,
            })
            .unwrap();
        }

        let memtable = Memtable::open(tmp.path(), true).unwrap();
        assert_eq!(memtable.get(b"k").unwrap().unwrap().value, b"new");
        assert_eq!(memtable.generation(), 3);
    }

    #[test]
    fn version_counter_resumes_past_recovered_records() {
        let tmp = TempDir::new().unwrap();
        {
            let memtable = Memtable::open(tmp.path(), true).unwrap();
            memtable.set(b"a".to_vec(), b"1".to_vec()).unwrap();
            memtable.set(b"b".to_vec(), b"2".to_vec()).unwrap();
        }

        let memtable = Memtable::open(tmp.path(), true).unwrap();
        let recovered_b = memtable.get(b"b").unwrap().unwrap().version;

        memtable.set(b"c".to_vec(), b"3".to_vec()).unwrap();
        let fresh_c = memtable.get(b"c").unwrap().unwrap().version;
        assert!(fresh_c > recovered_b);
    }

    #[test]
    fn fresh_memtable_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let memtable = Memtable::fresh(tmp.path(), 5, true, 100).unwrap();

        assert!(memtable.is_empty());
        assert_eq!(memtable.size(), 0);
        assert_eq!(memtable.generation(), 5);
        assert_eq!(memtable.next_version(), 100);
    }
}
