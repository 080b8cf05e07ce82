//! Point-lookup tests: bounds, filter interaction, tombstones.

#[cfg(test)]
mod tests {
    use crate::entry::Entry;
    use crate::sstable::{SSTable, TableConfig, TableWriter};
    use tempfile::TempDir;

    fn build(config: &TableConfig, tmp: &TempDir, entries: &[Entry]) -> SSTable {
        let path = tmp.path().join("t.sst");
        let mut writer = TableWriter::new(&path, config).unwrap();
        for entry in entries {
            writer.add(entry).unwrap();
        }
        writer.finish().unwrap();
        SSTable::open(&path, config).unwrap()
    }

    #[test]
    fn finds_present_keys() {
        let tmp = TempDir::new().unwrap();
        let config = TableConfig::default();
        let entries: Vec<Entry> = (0..100)
            .map(|i| Entry::put(format!("k{i:03}").into_bytes(), format!("v{i}").into_bytes(), 0))
            .collect();
        let table = build(&config, &tmp, &entries);

        for entry in &entries {
            let found = table.get(&entry.key).unwrap().unwrap();
            assert_eq!(found.value, entry.value);
        }
    }

    #[test]
    fn absent_keys_return_none() {
        let tmp = TempDir::new().unwrap();
        let config = TableConfig::default();
        let table = build(
            &config,
            &tmp,
            &[
                Entry::put(b"b".to_vec(), b"1".to_vec(), 0),
                Entry::put(b"d".to_vec(), b"2".to_vec(), 0),
            ],
        );

        // Below min, between entries, above max.
        assert!(table.get(b"a").unwrap().is_none());
        assert!(table.get(b"c").unwrap().is_none());
        assert!(table.get(b"e").unwrap().is_none());
    }

    #[test]
    fn tombstones_are_returned_faithfully() {
        let tmp = TempDir::new().unwrap();
        let config = TableConfig::default();
        let table = build(
            &config,
            &tmp,
            &[
                Entry::put(b"alive".to_vec(), b"yes".to_vec(), 0),
                Entry::tombstone(b"dead".to_vec(), 0),
            ],
        );

        let dead = table.get(b"dead").unwrap().unwrap();
        assert!(dead.tombstone);
        let alive = table.get(b"alive").unwrap().unwrap();
        assert!(!alive.tombstone);
    }

    #[test]
    fn lookup_lands_in_correct_block() {
        let tmp = TempDir::new().unwrap();
        let config = TableConfig {
            data_block_size: 64,
            ..TableConfig::default()
        };
        let entries: Vec<Entry> = (0..300)
            .map(|i| Entry::put(format!("key{i:04}").into_bytes(), format!("{i}").into_bytes(), 0))
            .collect();
        let table = build(&config, &tmp, &entries);
        assert!(table.block_count() > 5);

        // Probe keys across every region of the table.
        for i in [0, 1, 149, 150, 298, 299] {
            let key = format!("key{i:04}");
            let found = table.get(key.as_bytes()).unwrap().unwrap();
            assert_eq!(found.value, format!("{i}").into_bytes());
        }
    }

    #[test]
    fn every_written_key_passes_the_filter() {
        let tmp = TempDir::new().unwrap();
        let config = TableConfig::default();
        let entries: Vec<Entry> = (0..500)
            .map(|i| Entry::put(format!("present{i}").into_bytes(), b"v".to_vec(), 0))
            .collect();
        let table = build(&config, &tmp, &entries);

        // get consults the bloom filter; a false negative would surface
        // here as a missing key.
        for entry in &entries {
            assert!(table.get(&entry.key).unwrap().is_some());
        }
    }
}
