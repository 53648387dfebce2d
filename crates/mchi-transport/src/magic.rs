use std::fmt;

/// Four ASCII bytes identifying a ring session, a chunk, or a tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Magic([u8; 4]);

/// Magic written at the base of each ready ring and at the head of every chunk.
pub const SESSION_MAGIC: Magic = Magic::new(*b"MCHI");

impl Magic {
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Build a magic from the first four bytes of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let head: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        Some(Self(head))
    }

    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        self.0
    }
}

impl fmt::Display for Magic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in &self.0 {
            if byte.is_ascii_graphic() || byte == b' ' {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{byte:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Magic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Magic(\"{self}\")")
    }
}

impl From<[u8; 4]> for Magic {
    fn from(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_ascii_and_escapes_the_rest() {
        assert_eq!(SESSION_MAGIC.to_string(), "MCHI");
        assert_eq!(Magic::new([b'O', b'R', 0, 0xFF]).to_string(), "OR\\x00\\xff");
    }

    #[test]
    fn from_slice_needs_four_bytes() {
        assert_eq!(Magic::from_slice(b"ORefxx"), Some(Magic::new(*b"ORef")));
        assert_eq!(Magic::from_slice(b"OR"), None);
    }
}
