// Memory-mapped byte source over a whole image file.
//
// The walkers and the expander all read from the same immutable mapping;
// plain subslices give each of them an independent cursor for free.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{Error, Result};

/// Read-only random-access view of one image file.
#[derive(Debug)]
pub struct ImageFile {
    map: Mmap,
    path: PathBuf,
}

impl ImageFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        // Safety: the mapping is private and read-only; concurrent external
        // truncation of an input image is outside the supported contract.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| Error::io(path, e))?;
        Ok(Self {
            map,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.map.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The full image as a slice; callers take subslices as cursors.
    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    /// Bounds-checked read of `len` bytes at `offset`.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<&[u8]> {
        let end = offset
            .checked_add(len as u64)
            .filter(|&end| end <= self.len())
            .ok_or_else(|| {
                Error::MalformedImage(format!(
                    "read of {len} bytes at offset {offset} past end of image ({} bytes)",
                    self.len()
                ))
            })?;
        Ok(&self.map[offset as usize..end as usize])
    }

    /// Exact-size read into a fixed array, for on-disk structs.
    pub fn read_array<const N: usize>(&self, offset: u64) -> Result<[u8; N]> {
        let slice = self.read_at(offset, N)?;
        Ok(slice.try_into().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn image_with(data: &[u8]) -> ImageFile {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(data).unwrap();
        tmp.flush().unwrap();
        let img = ImageFile::open(tmp.path()).unwrap();
        // Keep the file alive for the mapping's lifetime on all platforms.
        std::mem::forget(tmp);
        img
    }

    #[test]
    fn read_at_in_bounds() {
        let img = image_with(b"hello world");
        assert_eq!(img.len(), 11);
        assert_eq!(img.read_at(6, 5).unwrap(), b"world");
        assert_eq!(img.read_array::<5>(0).unwrap(), *b"hello");
    }

    #[test]
    fn read_at_rejects_out_of_bounds() {
        let img = image_with(b"abc");
        assert!(matches!(
            img.read_at(2, 2),
            Err(Error::MalformedImage(_))
        ));
        assert!(matches!(
            img.read_at(u64::MAX, 1),
            Err(Error::MalformedImage(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ImageFile::open("/nonexistent/sqdelta-test").unwrap_err();
        assert!(matches!(err, Error::Io { path: Some(_), .. }));
    }
}
