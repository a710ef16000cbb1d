use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::constants::{METADATA_SIZE, PAYLOAD_SIZE};
use super::error::ReaderError;
use super::locator::ModuleFrameLocator;

/// The currently open shard of a reader
#[derive(Debug)]
struct OpenShard {
    path: PathBuf,
    handle: File,
}

/// ModuleFrameReader reads the frames of a single module out of its shard files.
///
/// Exactly one shard is held open at a time. The handle is reused as long as consecutive
/// pulses resolve to the same file and is swapped once the pulse id crosses a shard
/// boundary. Files are read through unbuffered handles straight into the caller's buffers.
#[derive(Debug)]
pub struct ModuleFrameReader {
    locator: ModuleFrameLocator,
    module: usize,
    shard: Option<OpenShard>,
}

impl ModuleFrameReader {
    pub fn new(locator: ModuleFrameLocator, module: usize) -> Self {
        Self {
            locator,
            module,
            shard: None,
        }
    }

    pub fn get_module(&self) -> usize {
        self.module
    }

    /// Path of the shard currently held open, if any
    pub fn get_open_path(&self) -> Option<&Path> {
        self.shard.as_ref().map(|shard| shard.path.as_path())
    }

    /// Read the frame of `pulse_id` into the given metadata and payload buffers.
    ///
    /// The buffers must be exactly METADATA_SIZE and PAYLOAD_SIZE long. A missing shard
    /// is reported as `OpenFailed`, a truncated one as `ShortRead`.
    pub fn load(
        &mut self,
        pulse_id: u64,
        metadata: &mut [u8],
        payload: &mut [u8],
    ) -> Result<(), ReaderError> {
        debug_assert_eq!(metadata.len(), METADATA_SIZE);
        debug_assert_eq!(payload.len(), PAYLOAD_SIZE);

        let location = self.locator.locate(pulse_id, self.module)?;
        let shard = self.open_shard(&location.path)?;

        let offset = location.byte_offset();
        shard.handle.seek(SeekFrom::Start(offset))?;
        read_exact_or_short(&mut shard.handle, metadata, &shard.path, offset)?;

        let offset = offset + METADATA_SIZE as u64;
        shard.handle.seek(SeekFrom::Start(offset))?;
        read_exact_or_short(&mut shard.handle, payload, &shard.path, offset)?;
        Ok(())
    }

    /// Release the open shard, if any
    pub fn close(&mut self) {
        if let Some(shard) = self.shard.take() {
            spdlog::debug!("Module {} closing shard {:?}", self.module, shard.path);
        }
    }

    /// Make sure the shard at path is the open one and hand it back
    fn open_shard(&mut self, path: &Path) -> Result<&mut OpenShard, ReaderError> {
        let shard = match self.shard.take() {
            Some(shard) if shard.path == path => shard,
            previous => {
                // The old handle is released before the new file is tried
                if let Some(previous) = previous {
                    spdlog::debug!("Module {} closing shard {:?}", self.module, previous.path);
                }
                let handle = File::open(path).map_err(|source| ReaderError::OpenFailed {
                    path: path.to_path_buf(),
                    source,
                })?;
                spdlog::debug!("Module {} opened shard {:?}", self.module, path);
                OpenShard {
                    path: path.to_path_buf(),
                    handle,
                }
            }
        };
        Ok(self.shard.insert(shard))
    }
}

/// Fill all of buf from the file, reporting how far we got if the file ends early
fn read_exact_or_short(
    handle: &mut File,
    buf: &mut [u8],
    path: &Path,
    offset: u64,
) -> Result<(), ReaderError> {
    let mut filled = 0;
    while filled < buf.len() {
        match handle.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ReaderError::IOError(e)),
        }
    }
    if filled < buf.len() {
        return Err(ReaderError::ShortRead {
            path: path.to_path_buf(),
            offset,
            expected: buf.len(),
            found: filled,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_frame::FrameMetadata;
    use crate::test_utils::{test_metadata, write_frame};
    use byteorder::{ByteOrder, LittleEndian};

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let meta = FrameMetadata {
            marker: 1,
            pulse_id: 4321,
            frame_index: 17,
            daq_rec: 0x1234,
            n_recv_packets: 128,
            module_id: 1,
        };
        write_frame(dir.path(), 1, 4321, &meta, 0xBEEF).unwrap();

        let locator = ModuleFrameLocator::new(dir.path(), 2);
        let mut reader = ModuleFrameReader::new(locator, 1);
        let mut meta_buf = vec![0u8; METADATA_SIZE];
        let mut payload_buf = vec![0u8; PAYLOAD_SIZE];
        reader.load(4321, &mut meta_buf, &mut payload_buf).unwrap();

        assert_eq!(FrameMetadata::from_bytes(&meta_buf).unwrap(), meta);
        assert!(payload_buf
            .chunks_exact(2)
            .all(|px| LittleEndian::read_u16(px) == 0xBEEF));
    }

    #[test]
    fn test_reuses_handle_within_shard_and_reopens_across() {
        let dir = tempfile::tempdir().unwrap();
        for pulse_id in [998, 999, 1000] {
            write_frame(dir.path(), 0, pulse_id, &test_metadata(pulse_id, 0), 7).unwrap();
        }
        let locator = ModuleFrameLocator::new(dir.path(), 1);
        let mut reader = ModuleFrameReader::new(locator.clone(), 0);
        let mut meta_buf = vec![0u8; METADATA_SIZE];
        let mut payload_buf = vec![0u8; PAYLOAD_SIZE];

        reader.load(998, &mut meta_buf, &mut payload_buf).unwrap();
        let first = reader.get_open_path().unwrap().to_path_buf();
        reader.load(999, &mut meta_buf, &mut payload_buf).unwrap();
        assert_eq!(reader.get_open_path().unwrap(), first.as_path());
        assert_eq!(FrameMetadata::from_bytes(&meta_buf).unwrap().pulse_id, 999);

        reader.load(1000, &mut meta_buf, &mut payload_buf).unwrap();
        assert_eq!(
            reader.get_open_path().unwrap(),
            locator.locate(1000, 0).unwrap().path.as_path()
        );
        assert_eq!(FrameMetadata::from_bytes(&meta_buf).unwrap().pulse_id, 1000);

        reader.close();
        assert!(reader.get_open_path().is_none());
    }

    #[test]
    fn test_missing_shard() {
        let dir = tempfile::tempdir().unwrap();
        let locator = ModuleFrameLocator::new(dir.path(), 1);
        let mut reader = ModuleFrameReader::new(locator, 0);
        let mut meta_buf = vec![0u8; METADATA_SIZE];
        let mut payload_buf = vec![0u8; PAYLOAD_SIZE];
        let result = reader.load(5, &mut meta_buf, &mut payload_buf);
        assert!(matches!(result, Err(ReaderError::OpenFailed { .. })));
        assert!(reader.get_open_path().is_none());
    }

    #[test]
    fn test_truncated_shard() {
        let dir = tempfile::tempdir().unwrap();
        let location = write_frame(dir.path(), 0, 2, &test_metadata(2, 0), 1).unwrap();
        // Cut the file in the middle of the payload of pulse 2
        let truncated = location.byte_offset() + (METADATA_SIZE + 100) as u64;
        std::fs::OpenOptions::new()
            .write(true)
            .open(&location.path)
            .unwrap()
            .set_len(truncated)
            .unwrap();

        let locator = ModuleFrameLocator::new(dir.path(), 1);
        let mut reader = ModuleFrameReader::new(locator, 0);
        let mut meta_buf = vec![0u8; METADATA_SIZE];
        let mut payload_buf = vec![0u8; PAYLOAD_SIZE];
        match reader.load(2, &mut meta_buf, &mut payload_buf) {
            Err(ReaderError::ShortRead {
                expected, found, ..
            }) => {
                assert_eq!(expected, PAYLOAD_SIZE);
                assert_eq!(found, 100);
            }
            other => panic!("expected a short read, got {other:?}"),
        }
        // Pulse 3 lies completely past the end of the file
        let result = reader.load(3, &mut meta_buf, &mut payload_buf);
        assert!(matches!(
            result,
            Err(ReaderError::ShortRead { found: 0, .. })
        ));
    }
}
