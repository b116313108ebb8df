use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::unit::Unit;
use super::DoubleArray;

/// The on-disk format is nothing but the unit vector itself: one
/// little-endian 32-bit word per unit, no header, no magic, no length.
impl DoubleArray {
    /// Writes the raw unit array to `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for unit in &self.units {
            writer.write_all(&unit.raw().to_le_bytes())?;
        }
        Ok(())
    }

    /// Saves the raw unit array to a file, replacing any existing content.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()
    }

    /// Reads a unit array from `reader` until end of input.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// Reconstructs a trie from raw bytes previously produced by
    /// [`write_to`](Self::write_to).
    ///
    /// The input must be non-empty and a whole number of 32-bit words;
    /// anything else is `InvalidData`.
    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unit array must be a non-empty multiple of 4 bytes",
            ));
        }
        let units = bytes
            .chunks_exact(4)
            .map(|word| Unit::from_raw(u32::from_le_bytes([word[0], word[1], word[2], word[3]])))
            .collect();
        Ok(DoubleArray { units })
    }

    /// Loads a whole file as a unit array.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::open_at(path, 0, 0)
    }

    /// Loads a unit array embedded in a file, starting at byte `offset` and
    /// spanning `size` bytes; a `size` of 0 reads to end of file.
    pub fn open_at<P: AsRef<Path>>(path: P, offset: u64, size: u64) -> io::Result<Self> {
        let file = File::open(path)?;

        let size = if size == 0 {
            let total = file.metadata()?.len();
            if total <= offset {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "offset lies past the end of the file",
                ));
            }
            total - offset
        } else {
            size
        };

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(offset))?;
        let mut bytes = vec![0u8; size as usize];
        reader.read_exact(&mut bytes)?;
        Self::from_bytes(&bytes)
    }
}
