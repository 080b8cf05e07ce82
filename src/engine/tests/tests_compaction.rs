//! Level compaction behavior observed through the engine surface.

#[cfg(test)]
mod tests {
    use crate::engine::tests::helpers::*;
    use crate::engine::{Engine, EngineError};
    use tempfile::TempDir;

    #[test]
    fn two_level_zero_tables_fold_into_level_one() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), flush_every_write_config()).unwrap();

        engine.set("name", "alice").unwrap();
        engine.set("name", "bob").unwrap();

        let stats = engine.stats().unwrap();
        assert_eq!(stats.level_table_counts[0], 0, "level 0 must drain");
        assert_eq!(stats.level_table_counts[1], 1, "level 1 holds the union");

        // Newer value won the merge.
        assert_eq!(engine.get("name").unwrap(), b"bob");
    }

    #[test]
    fn union_of_disjoint_tables_is_preserved() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), flush_every_write_config()).unwrap();

        engine.set("a", "1").unwrap();
        engine.set("z", "26").unwrap();

        assert_eq!(engine.get("a").unwrap(), b"1");
        assert_eq!(engine.get("z").unwrap(), b"26");
    }

    #[test]
    fn delete_then_compact_to_bottom_drops_the_key_entirely() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), flush_every_write_config()).unwrap();

        // Write + flush, delete + flush, compact through to the bottom.
        engine.set("k", "v").unwrap();
        engine.delete("k").unwrap();

        assert!(matches!(engine.get("k"), Err(EngineError::KeyNotFound)));

        // The bottom level holds no trace of the key: the merge of the
        // put and its tombstone produced nothing at all.
        let stats = engine.stats().unwrap();
        assert_eq!(stats.level_table_counts.iter().sum::<usize>(), 0);
    }

    #[test]
    fn repeated_flushes_cascade_and_stay_readable() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), flush_every_write_config()).unwrap();

        for i in 0..16 {
            engine.set(&format!("key{i:02}"), format!("v{i}")).unwrap();
        }

        for i in 0..16 {
            assert_eq!(
                engine.get(&format!("key{i:02}")).unwrap(),
                format!("v{i}").into_bytes()
            );
        }

        let stats = engine.stats().unwrap();
        assert_eq!(stats.level_table_counts[0], 0);
    }

    #[test]
    fn deletes_mask_older_levels_until_dropped() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), flush_every_write_config()).unwrap();

        // Build up some depth first.
        engine.set("keep", "1").unwrap();
        engine.set("victim", "2").unwrap();
        engine.set("other", "3").unwrap();

        engine.delete("victim").unwrap();

        assert_eq!(engine.get("keep").unwrap(), b"1");
        assert_eq!(engine.get("other").unwrap(), b"3");
        assert!(matches!(engine.get("victim"), Err(EngineError::KeyNotFound)));
    }
}
