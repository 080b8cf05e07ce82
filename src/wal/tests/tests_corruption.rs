//! Corruption and truncation detection tests.

#[cfg(test)]
mod tests {
    use crate::wal::{Wal, WalError, WalRecord};
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::TempDir;

    fn set(key: &[u8], value: &[u8], version: u64) -> WalRecord {
        WalRecord::Set {
            key: key.to_vec(),
            value: value.to_vec(),
            version,
        }
    }

    #[test]
    fn flipped_payload_byte_fails_checksum() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), 1, true).unwrap();
        wal.append(&set(b"victim", b"payload", 1)).unwrap();
        let path = wal.path().to_path_buf();
        drop(wal);

        // Flip one byte in the record payload (past header + crc + len).
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(30)).unwrap();
        file.write_all(&[0xFF]).unwrap();
        drop(file);

        let wal = Wal::open(tmp.path(), 1, true).unwrap();
        let results: Vec<_> = wal.replay_iter().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(WalError::ChecksumMismatch) | Err(WalError::Encoding(_))
        ));
    }

    #[test]
    fn truncated_tail_reports_eof() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), 1, true).unwrap();
        wal.append(&set(b"first", b"ok", 1)).unwrap();
        wal.append(&set(b"second", b"will-be-cut", 2)).unwrap();
        let path = wal.path().to_path_buf();
        drop(wal);

        // Chop off the last few bytes, simulating a torn write.
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        let len = file.metadata().unwrap().len();
        file.set_len(len - 5).unwrap();
        drop(file);

        let wal = Wal::open(tmp.path(), 1, true).unwrap();
        let mut iter = wal.replay_iter();

        // First record is intact.
        assert_eq!(iter.next().unwrap().unwrap(), set(b"first", b"ok", 1));
        // Second is torn.
        assert!(matches!(
            iter.next(),
            Some(Err(WalError::UnexpectedEof)) | Some(Err(WalError::Io(_)))
        ));
    }

    #[test]
    fn corrupted_header_fails_open() {
        let tmp = TempDir::new().unwrap();
        {
            let _wal = Wal::open(tmp.path(), 1, true).unwrap();
        }

        let path = tmp.path().join(Wal::file_name(1));
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write_all(b"XXXX").unwrap();
        drop(file);

        assert!(matches!(
            Wal::open_path(&path, true),
            Err(WalError::InvalidHeader(_))
        ));
    }

    #[test]
    fn absurd_length_prefix_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), 1, true).unwrap();
        let path = wal.path().to_path_buf();
        drop(wal);

        // Append a frame whose length prefix claims ~4 GiB.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&u32::MAX.to_le_bytes()).unwrap();
        drop(file);

        let wal = Wal::open(tmp.path(), 1, true).unwrap();
        let results: Vec<_> = wal.replay_iter().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(WalError::RecordTooLarge(_))));
    }
}
