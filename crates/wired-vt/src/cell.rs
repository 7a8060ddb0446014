use bitflags::bitflags;

bitflags! {
    /// Cell attribute flags, packed into a single byte.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CellFlags: u8 {
        const BOLD          = 0b0000_0001;
        const ITALIC        = 0b0000_0010;
        const UNDERLINE     = 0b0000_0100;
        const STRIKETHROUGH = 0b0000_1000;
        const INVERSE       = 0b0001_0000;
        const DIM           = 0b0010_0000;
        const HIDDEN        = 0b0100_0000;
    }
}

impl CellFlags {
    /// SGR parameters that switch these attributes on.
    pub fn sgr_params(self) -> impl Iterator<Item = u8> {
        [
            (CellFlags::BOLD, 1),
            (CellFlags::DIM, 2),
            (CellFlags::ITALIC, 3),
            (CellFlags::UNDERLINE, 4),
            (CellFlags::INVERSE, 7),
            (CellFlags::HIDDEN, 8),
            (CellFlags::STRIKETHROUGH, 9),
        ]
        .into_iter()
        .filter(move |(flag, _)| self.contains(*flag))
        .map(|(_, code)| code)
    }
}

/// A single cell in the terminal grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VtCell {
    /// The character displayed in this cell.
    pub codepoint: char,
    pub flags: CellFlags,
    /// Character width: 1 for normal, 2 for wide (CJK) chars, 0 for the
    /// spacer that follows a wide char.
    pub width: u8,
}

impl Default for VtCell {
    fn default() -> Self {
        Self {
            codepoint: ' ',
            flags: CellFlags::empty(),
            width: 1,
        }
    }
}
