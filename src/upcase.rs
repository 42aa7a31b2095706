/// The upcase table used for case-insensitive name comparison.
///
/// Loading and lookups belong to the directory layer; the volume only owns the table and tears
/// it down on unmount.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpcaseTable {
    chars: Vec<u16>,
}

impl UpcaseTable {
    pub fn new(chars: Vec<u16>) -> UpcaseTable {
        UpcaseTable { chars }
    }

    /// Number of mapped characters.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn chars(&self) -> &[u16] {
        &self.chars
    }

    /// Frees the table and forgets its length.
    pub fn release(&mut self) {
        self.chars = Vec::new();
    }
}
