use std::io::{self, Read, Seek, SeekFrom};

pub struct LittleEndianReader<R> {
    inner: R,
}

impl<R: Read + Seek> LittleEndianReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.inner.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.inner.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_u64_array<const N: usize>(&mut self) -> io::Result<[u64; N]> {
        let mut result = [0u64; N];
        for item in &mut result {
            *item = self.read_u64()?;
        }
        Ok(result)
    }

    pub fn read_bytes(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Length-prefixed (u32) UTF-8 string. Invalid UTF-8 is replaced rather than rejected.
    pub fn read_sized_string(&mut self) -> io::Result<String> {
        let len = self.read_u32()? as u64;
        if len > self.remaining()? {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("string length {len} exceeds remaining bytes"),
            ));
        }
        let bytes = self.read_bytes(len as usize)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn position(&mut self) -> io::Result<u64> {
        self.inner.stream_position()
    }

    pub fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn stream_len(&mut self) -> io::Result<u64> {
        let current = self.inner.stream_position()?;
        let end = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(current))?;
        Ok(end)
    }

    pub fn remaining(&mut self) -> io::Result<u64> {
        let pos = self.position()?;
        Ok(self.stream_len()?.saturating_sub(pos))
    }
}

/// Little-endian writer used by the record emitters and by tests that
/// hand-build legacy payloads.
#[derive(Debug, Default, Clone)]
pub struct RecordWriter {
    buf: Vec<u8>,
}

impl RecordWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn write_sized_string(&mut self, text: &str) -> &mut Self {
        self.write_u32(text.len() as u32);
        self.write_bytes(text.as_bytes())
    }

    /// Append a framed record: `(type, version, length)` header then payload.
    pub fn write_record(&mut self, record_type: u32, version: u32, payload: &[u8]) -> &mut Self {
        self.write_u32(record_type);
        self.write_u32(version);
        self.write_u32(payload.len() as u32);
        self.write_bytes(payload)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
