use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use super::constants::{METADATA_SIZE, N_PACKETS_PER_FRAME};

/// The metadata record the readout writes in front of every module frame.
///
/// On disk this is a packed 41 byte record:
///
/// ```text
/// [marker: u8][pulse_id: u64][frame_index: u64][daq_rec: u64][n_recv_packets: u64][module_id: u64]
/// ```
///
/// All integers are little-endian, as produced by the readout hardware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    pub marker: u8,
    pub pulse_id: u64,
    pub frame_index: u64,
    /// Detector status word; carries the gain mode and trigger condition bits
    pub daq_rec: u64,
    pub n_recv_packets: u64,
    pub module_id: u64,
}

impl FrameMetadata {
    /// Decode a metadata record from the front of `bytes`.
    ///
    /// Returns an error if fewer than METADATA_SIZE bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, std::io::Error> {
        let mut cursor = bytes;
        Ok(Self {
            marker: cursor.read_u8()?,
            pulse_id: cursor.read_u64::<LittleEndian>()?,
            frame_index: cursor.read_u64::<LittleEndian>()?,
            daq_rec: cursor.read_u64::<LittleEndian>()?,
            n_recv_packets: cursor.read_u64::<LittleEndian>()?,
            module_id: cursor.read_u64::<LittleEndian>()?,
        })
    }

    /// Encode the record into its packed on-disk form
    pub fn write_to<W: std::io::Write>(&self, writer: &mut W) -> Result<(), std::io::Error> {
        writer.write_u8(self.marker)?;
        writer.write_u64::<LittleEndian>(self.pulse_id)?;
        writer.write_u64::<LittleEndian>(self.frame_index)?;
        writer.write_u64::<LittleEndian>(self.daq_rec)?;
        writer.write_u64::<LittleEndian>(self.n_recv_packets)?;
        writer.write_u64::<LittleEndian>(self.module_id)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; METADATA_SIZE] {
        let mut bytes = [0u8; METADATA_SIZE];
        bytes[0] = self.marker;
        LittleEndian::write_u64(&mut bytes[1..9], self.pulse_id);
        LittleEndian::write_u64(&mut bytes[9..17], self.frame_index);
        LittleEndian::write_u64(&mut bytes[17..25], self.daq_rec);
        LittleEndian::write_u64(&mut bytes[25..33], self.n_recv_packets);
        LittleEndian::write_u64(&mut bytes[33..41], self.module_id);
        bytes
    }

    /// A frame is complete if it belongs to the expected pulse and no packets were lost
    pub fn is_complete(&self, expected_pulse_id: u64) -> bool {
        self.pulse_id == expected_pulse_id && self.n_recv_packets == N_PACKETS_PER_FRAME
    }
}
