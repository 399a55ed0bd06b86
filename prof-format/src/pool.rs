//! Owning byte arena for decoded variable-length records.

/// Contiguous storage for raw record payloads.
///
/// Records are appended once during decode and addressed by their byte
/// offset afterwards. The arena only ever grows, so an offset handed out
/// by [`SerializedData::push`] stays valid for the whole session even
/// when the underlying buffer reallocates.
#[derive(Debug, Default)]
pub struct SerializedData {
    data: Vec<u8>,
}

impl SerializedData {
    pub fn new() -> Self {
        SerializedData { data: Vec::new() }
    }

    pub fn with_capacity(bytes: u64) -> Self {
        SerializedData {
            data: Vec::with_capacity(bytes as usize),
        }
    }

    /// Appends a payload and returns its offset handle.
    pub fn push(&mut self, payload: &[u8]) -> u64 {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(payload);
        offset
    }

    pub fn bytes(&self, offset: u64, len: usize) -> &[u8] {
        let start = offset as usize;
        &self.data[start..start + len]
    }

    pub fn read_u32(&self, offset: u64) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.bytes(offset, 4));
        u32::from_le_bytes(buf)
    }

    pub fn read_u64(&self, offset: u64) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.bytes(offset, 8));
        u64::from_le_bytes(buf)
    }

    pub fn write_u32(&mut self, offset: u64, value: u32) {
        let start = offset as usize;
        self.data[start..start + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, offset: u64, value: u64) {
        let start = offset as usize;
        self.data[start..start + 8].copy_from_slice(&value.to_le_bytes());
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}
