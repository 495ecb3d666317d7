use std::io;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// One region of a record stream. Record regions carry the record tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SectionId {
    RecordHeader(u32),
    RecordPayload(u32),
    /// Bytes left over after parsing stopped early.
    Tail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SectionLayout {
    pub id: SectionId,
    pub range: ByteRange,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamLayout {
    pub stream_len: usize,
    pub sections: Vec<SectionLayout>,
}

impl StreamLayout {
    pub fn push(&mut self, id: SectionId, start: usize, end: usize) {
        self.sections.push(SectionLayout {
            id,
            range: ByteRange { start, end },
        });
    }

    pub fn record_count(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| matches!(s.id, SectionId::RecordHeader(_)))
            .count()
    }

    /// Check that the sections tile `0..stream_len` with no gap or overlap.
    pub fn validate(&self) -> io::Result<()> {
        let Some(first) = self.sections.first() else {
            if self.stream_len == 0 {
                return Ok(());
            }
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "non-empty stream layout must contain at least one section",
            ));
        };

        if first.range.start != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "layout does not start at byte 0",
            ));
        }

        let mut expected = 0usize;
        for section in &self.sections {
            if section.range.start != expected {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "layout gap/overlap around {:?}: expected start {}, got {}",
                        section.id, expected, section.range.start
                    ),
                ));
            }
            if section.range.end < section.range.start {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "invalid range {:?}: {}..{}",
                        section.id, section.range.start, section.range.end
                    ),
                ));
            }
            expected = section.range.end;
        }

        if expected != self.stream_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "layout does not cover stream: ended at {}, stream length {}",
                    expected, self.stream_len
                ),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_layout_is_valid_only_for_empty_stream() {
        let empty = StreamLayout::default();
        assert!(empty.validate().is_ok());

        let dangling = StreamLayout {
            stream_len: 4,
            sections: Vec::new(),
        };
        assert!(dangling.validate().is_err());
    }

    #[test]
    fn gap_between_sections_is_rejected() {
        let mut layout = StreamLayout {
            stream_len: 20,
            sections: Vec::new(),
        };
        layout.push(SectionId::RecordHeader(1), 0, 12);
        layout.push(SectionId::RecordPayload(1), 13, 20);
        assert!(layout.validate().is_err());
    }
}
