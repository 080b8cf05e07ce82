//! Structural damage detection tests.

#[cfg(test)]
mod tests {
    use crate::entry::Entry;
    use crate::sstable::{SSTable, SSTableError, TableConfig, TableWriter, FOOTER_SIZE};
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::TempDir;

    fn build(tmp: &TempDir) -> std::path::PathBuf {
        let path = tmp.path().join("t.sst");
        let mut writer = TableWriter::new(&path, &TableConfig::default()).unwrap();
        writer
            .add(&Entry::put(b"k".to_vec(), b"v".to_vec(), 0))
            .unwrap();
        writer.finish().unwrap();
        path
    }

    #[test]
    fn clobbered_magic_fails_open() {
        let tmp = TempDir::new().unwrap();
        let path = build(&tmp);

        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        let len = file.metadata().unwrap().len();
        // Magic occupies the footer's final 8 bytes.
        file.seek(SeekFrom::Start(len - 8)).unwrap();
        file.write_all(&[0u8; 8]).unwrap();
        drop(file);

        assert!(matches!(
            SSTable::open(&path, &TableConfig::default()),
            Err(SSTableError::BadMagic(0))
        ));
    }

    #[test]
    fn file_smaller_than_footer_fails_open() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("stub.sst");
        std::fs::write(&path, vec![0u8; FOOTER_SIZE - 1]).unwrap();

        assert!(matches!(
            SSTable::open(&path, &TableConfig::default()),
            Err(SSTableError::Corrupt(_))
        ));
    }

    #[test]
    fn nonsense_footer_offsets_fail_open() {
        let tmp = TempDir::new().unwrap();
        let path = build(&tmp);

        // Overwrite the index offset (bytes 12..20 of the footer) with a
        // value far beyond the file.
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        let len = file.metadata().unwrap().len();
        file.seek(SeekFrom::Start(len - FOOTER_SIZE as u64 + 12))
            .unwrap();
        file.write_all(&(1i64 << 40).to_le_bytes()).unwrap();
        drop(file);

        assert!(matches!(
            SSTable::open(&path, &TableConfig::default()),
            Err(SSTableError::Corrupt(_))
        ));
    }

    #[test]
    fn mangled_data_block_surfaces_on_read() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("t.sst");

        let mut writer = TableWriter::new(&path, &TableConfig::default()).unwrap();
        for i in 0..50 {
            writer
                .add(&Entry::put(
                    format!("key{i:03}").into_bytes(),
                    vec![0x55; 64],
                    0,
                ))
                .unwrap();
        }
        writer.finish().unwrap();

        // Stomp the first data block; open still succeeds (footer/index
        // intact) but reading the block must fail.
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write_all(&[0xFF; 32]).unwrap();
        drop(file);

        let table = SSTable::open(&path, &TableConfig::default()).unwrap();
        assert!(table.get(b"key000").is_err());
    }
}
