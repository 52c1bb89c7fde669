use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fault_injection::fallible;

use crate::{PageId, Result, TransactionId};

const UPDATE: u8 = 1;
// crc + kind + tid + table id + page number + page length
const HEADER_LEN: usize = 4 + 1 + 8 + 8 + 8 + 8;

/// An update record read back out of the log: the page a
/// transaction changed, with its contents before and after
/// the change.
#[derive(Debug, Clone)]
pub struct WalRecord {
    pub tid: TransactionId,
    pub pid: PageId,
    pub before: Box<[u8]>,
    pub after: Box<[u8]>,
}

/// The write-ahead log.
///
/// Every dirty page flush appends an update record here and
/// forces the log before the data file is written, so the
/// log always holds the undo/redo pair for any page image
/// that has reached disk. Records are CRC-framed; a torn
/// tail from a crash mid-append fails its checksum and is
/// ignored by readers.
pub struct Wal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

fn record_crc(kind: u8, tid: u64, pid: PageId, before: &[u8], after: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[kind]);
    hasher.update(&tid.to_le_bytes());
    hasher.update(&pid.table_id.to_le_bytes());
    hasher.update(&pid.page_no.to_le_bytes());
    hasher.update(&(before.len() as u64).to_le_bytes());
    hasher.update(before);
    hasher.update(after);

    // XOR so an all-zero torn record never passes
    hasher.finalize() ^ 0xFF
}

impl Wal {
    pub(crate) fn open<P: AsRef<Path>>(path: P) -> Result<Wal> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);

        let file = fallible!(options.open(path.as_ref()));

        Ok(Wal {
            path: path.as_ref().into(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Appends an update record. The record is not durable
    /// until the next [`Wal::force`].
    pub fn log_write(
        &self,
        tid: TransactionId,
        pid: PageId,
        before: &[u8],
        after: &[u8],
    ) -> Result<()> {
        assert_eq!(
            before.len(),
            after.len(),
            "before- and after-images must be whole pages"
        );

        let crc = record_crc(UPDATE, tid.raw(), pid, before, after);

        let mut writer = self.writer.lock().unwrap();
        fallible!(writer.write_all(&crc.to_le_bytes()));
        fallible!(writer.write_all(&[UPDATE]));
        fallible!(writer.write_all(&tid.raw().to_le_bytes()));
        fallible!(writer.write_all(&pid.table_id.to_le_bytes()));
        fallible!(writer.write_all(&pid.page_no.to_le_bytes()));
        fallible!(writer.write_all(&(before.len() as u64).to_le_bytes()));
        fallible!(writer.write_all(before));
        fallible!(writer.write_all(after));

        Ok(())
    }

    /// Durability fence: flushes buffered records and fsyncs
    /// the log file. Nothing written before this call can be
    /// lost once it returns.
    pub fn force(&self) -> Result<()> {
        let mut writer = self.writer.lock().unwrap();
        fallible!(writer.flush());
        fallible!(writer.get_mut().sync_all());
        Ok(())
    }

    /// Reads every intact record from the start of the log,
    /// stopping cleanly at a torn or corrupt tail. Serves
    /// recovery audits and tests; only forced records are
    /// guaranteed to be visible.
    pub fn records(&self) -> Result<Vec<WalRecord>> {
        let file = fallible!(OpenOptions::new().read(true).open(&self.path));
        let mut reader = BufReader::new(file);

        let mut records = vec![];
        let mut header = [0_u8; HEADER_LEN];

        loop {
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(other) => return Err(other.into()),
            }

            let crc_expected = u32::from_le_bytes(header[0..4].try_into().unwrap());
            let kind = header[4];
            let tid = u64::from_le_bytes(header[5..13].try_into().unwrap());
            let table_id = u64::from_le_bytes(header[13..21].try_into().unwrap());
            let page_no = u64::from_le_bytes(header[21..29].try_into().unwrap());
            let page_len = u64::from_le_bytes(header[29..37].try_into().unwrap());

            if kind != UPDATE {
                log::warn!("invalid record discriminant {} in write-ahead log", kind);
                break;
            }

            // a corrupt length would otherwise drive a huge
            // allocation before the crc gets a chance to
            // reject the record
            const MAX_PAGE_LEN: u64 = 1 << 30;
            if page_len > MAX_PAGE_LEN {
                log::warn!("corrupt page length in write-ahead log");
                break;
            }
            let page_len = page_len as usize;

            let mut before = vec![0; page_len];
            let mut after = vec![0; page_len];
            let images = reader
                .read_exact(&mut before)
                .and_then(|_| reader.read_exact(&mut after));
            match images {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    log::warn!("torn record at end of write-ahead log");
                    break;
                }
                Err(other) => return Err(other.into()),
            }

            let pid = PageId { table_id, page_no };
            let crc_actual = record_crc(kind, tid, pid, &before, &after);

            if crc_expected != crc_actual {
                log::warn!("crc mismatch at end of write-ahead log, dropping tail");
                break;
            }

            records.push(WalRecord {
                tid: TransactionId::from_raw(tid),
                pid,
                before: before.into_boxed_slice(),
                after: after.into_boxed_slice(),
            });
        }

        Ok(records)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_and_torn_tail() {
        let dir = std::path::Path::new("testing_data_directories").join("wal_unit");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("wal");

        let wal = Wal::open(&path).unwrap();
        let tid = TransactionId::new();
        let pid = PageId {
            table_id: 3,
            page_no: 9,
        };

        wal.log_write(tid, pid, &[0; 64], &[7; 64]).unwrap();
        wal.force().unwrap();

        let records = wal.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tid, tid);
        assert_eq!(records[0].pid, pid);
        assert_eq!(&*records[0].before, &[0; 64][..]);
        assert_eq!(&*records[0].after, &[7; 64][..]);

        // a torn append must not hide the intact prefix
        {
            use std::io::Write;
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0xAA; 10]).unwrap();
        }
        let records = wal.records().unwrap();
        assert_eq!(records.len(), 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
