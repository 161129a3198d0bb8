use crate::{
    align::{is_aligned, ALIGNMENT},
    arena::{Arena, WORD_SIZE},
};

/// Every block starts with a header of six metadata words and ends with a
/// one-word footer that duplicates the payload size. The encoding is
/// explicit (little-endian words at fixed offsets) instead of relying on a
/// struct layout, so a test harness can walk the arena with nothing but the
/// size fields:
///
/// ```text
/// +----------------------------+ <- block offset
/// | payload size               | word 0
/// +----------------------------+
/// | state (0 = used, 1 = free) | word 1
/// +----------------------------+
/// | prev physical block        | word 2
/// +----------------------------+
/// | next physical block        | word 3
/// +----------------------------+
/// | prev free block            | word 4 (meaningful while free)
/// +----------------------------+
/// | next free block            | word 5 (meaningful while free)
/// +----------------------------+ <- payload offset
/// |          payload           |
/// |            ...             |
/// +----------------------------+ <- footer offset
/// | payload size (footer)      |
/// +----------------------------+ <- next block offset
/// ```
///
/// All links are arena-relative offsets to the start of another header, with
/// [`NIL`] standing in for "none". The footer lets any block find its
/// physical predecessor by reading the word right behind its own header, and
/// doubles as a redundant cross-check on the header size field.
pub(crate) const HEADER_SIZE: usize = 6 * WORD_SIZE;

/// Size of the trailing footer word.
pub(crate) const FOOTER_SIZE: usize = WORD_SIZE;

/// Bytes of metadata every block carries on top of its payload.
pub(crate) const BLOCK_OVERHEAD: usize = HEADER_SIZE + FOOTER_SIZE;

/// Smallest payload a block can have. Splitting never produces less.
pub(crate) const MIN_PAYLOAD_SIZE: usize = ALIGNMENT;

/// Link sentinel for "no neighbor". Offset 0 is a valid block (the first
/// one), so null can't be the sentinel here.
const NIL: u64 = u64::MAX;

const SIZE_WORD: usize = 0;
const STATE_WORD: usize = 1;
const PREV_PHYS_WORD: usize = 2;
const NEXT_PHYS_WORD: usize = 3;
const PREV_FREE_WORD: usize = 4;
const NEXT_FREE_WORD: usize = 5;

const STATE_USED: u64 = 0;
const STATE_FREE: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockState {
    Used,
    Free,
}

impl BlockState {
    fn from_word(word: u64) -> Option<Self> {
        match word {
            STATE_USED => Some(BlockState::Used),
            STATE_FREE => Some(BlockState::Free),
            _ => None,
        }
    }

    fn to_word(self) -> u64 {
        match self {
            BlockState::Used => STATE_USED,
            BlockState::Free => STATE_FREE,
        }
    }
}

/// Decoded form of a block's metadata. Load it, mutate the fields, store it
/// back; [`BlockHeader::store`] always rewrites the footer along with the
/// header so the cross-check is never stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    /// Bytes available to the caller, excluding header and footer. Always a
    /// multiple of [`ALIGNMENT`].
    pub payload_size: usize,
    pub state: BlockState,
    /// Immediately preceding block in arena byte order.
    pub prev_phys: Option<usize>,
    /// Immediately following block in arena byte order.
    pub next_phys: Option<usize>,
    /// Previous block in this block's free-list bin.
    pub prev_free: Option<usize>,
    /// Next block in this block's free-list bin.
    pub next_free: Option<usize>,
}

#[inline]
fn encode_link(link: Option<usize>) -> u64 {
    match link {
        Some(offset) => offset as u64,
        None => NIL,
    }
}

#[inline]
fn decode_link(word: u64) -> Option<usize> {
    (word != NIL).then_some(word as usize)
}

/// Offset of the payload that belongs to the header at `block`.
#[inline]
pub(crate) fn payload_of(block: usize) -> usize {
    block + HEADER_SIZE
}

/// Inverse of [`payload_of`]. Pure arithmetic, no validation; the engine
/// validates the offset before trusting the result.
#[inline]
pub(crate) fn block_of(payload: usize) -> usize {
    payload - HEADER_SIZE
}

impl BlockHeader {
    /// Decodes the header at `block`. Only for offsets the heap already
    /// trusts; garbage metadata is a heap invariant violation here.
    pub fn load(arena: &Arena, block: usize) -> Self {
        Self::try_load(arena, block).expect("corrupt block header")
    }

    /// Decodes the header at `block` if its bytes plausibly describe a
    /// block: recognizable state word, aligned payload size, and a span that
    /// stays inside the arena. This is what stands between a bad free call
    /// and memory corruption.
    pub fn try_load(arena: &Arena, block: usize) -> Option<Self> {
        let payload_size = arena.read_word(block + SIZE_WORD * WORD_SIZE) as usize;
        let state = BlockState::from_word(arena.read_word(block + STATE_WORD * WORD_SIZE))?;

        if !is_aligned(payload_size) {
            return None;
        }

        // Checked: a garbage size word must not wrap into a "valid" span.
        let end = block
            .checked_add(BLOCK_OVERHEAD)
            .and_then(|offset| offset.checked_add(payload_size))?;
        if end > arena.capacity() {
            return None;
        }

        Some(Self {
            payload_size,
            state,
            prev_phys: decode_link(arena.read_word(block + PREV_PHYS_WORD * WORD_SIZE)),
            next_phys: decode_link(arena.read_word(block + NEXT_PHYS_WORD * WORD_SIZE)),
            prev_free: decode_link(arena.read_word(block + PREV_FREE_WORD * WORD_SIZE)),
            next_free: decode_link(arena.read_word(block + NEXT_FREE_WORD * WORD_SIZE)),
        })
    }

    /// Encodes the header at `block` and rewrites the footer to match
    /// `payload_size`.
    pub fn store(&self, arena: &mut Arena, block: usize) {
        arena.write_word(block + SIZE_WORD * WORD_SIZE, self.payload_size as u64);
        arena.write_word(block + STATE_WORD * WORD_SIZE, self.state.to_word());
        arena.write_word(block + PREV_PHYS_WORD * WORD_SIZE, encode_link(self.prev_phys));
        arena.write_word(block + NEXT_PHYS_WORD * WORD_SIZE, encode_link(self.next_phys));
        arena.write_word(block + PREV_FREE_WORD * WORD_SIZE, encode_link(self.prev_free));
        arena.write_word(block + NEXT_FREE_WORD * WORD_SIZE, encode_link(self.next_free));
        arena.write_word(self.footer_offset(block), self.payload_size as u64);
    }

    /// Where this block's footer lives.
    #[inline]
    pub fn footer_offset(&self, block: usize) -> usize {
        block + HEADER_SIZE + self.payload_size
    }

    /// Offset one past this block; where the next physical block starts if
    /// there is one.
    #[inline]
    pub fn end_offset(&self, block: usize) -> usize {
        self.footer_offset(block) + FOOTER_SIZE
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }
}

/// Reads the footer cross-check for the block at `block`.
pub(crate) fn read_footer(arena: &Arena, block: usize) -> usize {
    let payload_size = arena.read_word(block + SIZE_WORD * WORD_SIZE) as usize;
    arena.read_word(block + HEADER_SIZE + payload_size) as usize
}

/// Recovers the physical predecessor of `block` using only the predecessor's
/// footer, without touching `prev_phys`. The redundant size encoding exists
/// exactly for this backward walk; the engine uses it as a cross-check on
/// the explicit link.
pub(crate) fn prev_via_footer(arena: &Arena, block: usize) -> Option<usize> {
    if block < BLOCK_OVERHEAD + MIN_PAYLOAD_SIZE {
        return None;
    }

    let prev_payload = arena.read_word(block - FOOTER_SIZE) as usize;
    block.checked_sub(BLOCK_OVERHEAD + prev_payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            payload_size: 64,
            state: BlockState::Free,
            prev_phys: None,
            next_phys: Some(136),
            prev_free: Some(136),
            next_free: None,
        }
    }

    #[test]
    fn header_round_trips_through_the_arena() {
        let mut arena = Arena::new(256);
        let header = sample_header();

        header.store(&mut arena, 0);

        assert_eq!(BlockHeader::load(&arena, 0), header);
    }

    #[test]
    fn store_keeps_the_footer_in_sync() {
        let mut arena = Arena::new(256);
        let mut header = sample_header();

        header.store(&mut arena, 0);
        assert_eq!(read_footer(&arena, 0), 64);

        header.payload_size = 32;
        header.store(&mut arena, 0);
        assert_eq!(read_footer(&arena, 0), 32);
    }

    #[test]
    fn footer_recovers_the_previous_block() {
        let mut arena = Arena::new(256);

        let first = sample_header();
        first.store(&mut arena, 0);

        let second_offset = first.end_offset(0);
        assert_eq!(prev_via_footer(&arena, second_offset), Some(0));
    }

    #[test]
    fn first_block_has_no_predecessor() {
        let arena = Arena::new(256);
        assert_eq!(prev_via_footer(&arena, 0), None);
    }

    #[test]
    fn garbage_does_not_decode() {
        let mut arena = Arena::new(256);

        // Unrecognizable state word.
        arena.write_word(0, 64);
        arena.write_word(8, 7);
        assert_eq!(BlockHeader::try_load(&arena, 0), None);

        // Payload size way past the end of the arena.
        arena.write_word(0, 4096);
        arena.write_word(8, STATE_USED);
        assert_eq!(BlockHeader::try_load(&arena, 0), None);

        // Misaligned payload size.
        arena.write_word(0, 13);
        assert_eq!(BlockHeader::try_load(&arena, 0), None);
    }
}
