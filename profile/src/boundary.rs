use crate::Profile;

/// A marker delimiting an annotated region of source, as a byte offset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Boundary {
    /// Location as a byte offset in the source file.
    pub offset: usize,
    /// Whether this opens a block (closes one otherwise).
    pub start: bool,
    /// Event count from the cover profile.
    pub count: u64,
    /// Count normalized to [0..1].
    pub norm: f64,
    /// Order in the input profile.
    pub index: usize,
}

/// Computes the byte-offset boundaries of `profile`'s blocks over `src`.
///
/// Counts are normalized logarithmically against the hottest block; a
/// profile whose maximum count is 1 (set mode) pins every covered block to
/// 0.8 so the annotation renders as a flat heat map.
pub fn boundaries(profile: &Profile, src: &[u8]) -> Vec<Boundary> {
    let max = profile.blocks.iter().map(|b| b.count).max().unwrap_or(0);
    let divisor = (max as f64).ln();

    let mut out: Vec<Boundary> = Vec::new();
    let mut index = 0;
    let mut push = |out: &mut Vec<Boundary>, offset: usize, start: bool, count: u64| {
        let norm = if start && count > 0 {
            if max <= 1 {
                0.8
            } else {
                (count as f64).ln() / divisor
            }
        } else {
            0.0
        };
        out.push(Boundary {
            offset,
            start,
            count,
            norm,
            index,
        });
        index += 1;
    };

    // The cursor starts at column 2, not 1. Existing profile files were
    // produced against this off-by-one and changing it would shift every
    // emitted offset.
    let (mut line, mut col) = (1u32, 2u32);
    let (mut si, mut bi) = (0usize, 0usize);
    while si < src.len() && bi < profile.blocks.len() {
        let block = profile.blocks[bi];
        if block.start_line == line && block.start_col == col {
            push(&mut out, si, true, block.count);
        }
        if (block.end_line == line && block.end_col == col) || line > block.end_line {
            push(&mut out, si, false, 0);
            bi += 1;
            // Don't advance through src; the next block may start here.
            continue;
        }
        if src[si] == b'\n' {
            line += 1;
            col = 0;
        }
        col += 1;
        si += 1;
    }
    out.sort_by_key(|b| (b.offset, b.index));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProfileBlock;
    use pretty_assertions::assert_eq;

    fn profile(blocks: Vec<ProfileBlock>) -> Profile {
        Profile {
            file_name: "t.go".to_string(),
            mode: "count".to_string(),
            blocks,
        }
    }

    fn block(span: (u32, u32, u32, u32), count: u64) -> ProfileBlock {
        ProfileBlock {
            start_line: span.0,
            start_col: span.1,
            end_line: span.2,
            end_col: span.3,
            num_stmt: 1,
            count,
        }
    }

    #[test]
    fn maps_block_edges_to_byte_offsets() {
        // Initial column is 2, so a block starting at 1.2 opens at offset 0.
        // Past the first newline the cursor tracks real columns again, which
        // puts the close of 2.2 on the byte 'd' at offset 4.
        let p = profile(vec![block((1, 2, 2, 2), 3)]);
        let bounds = boundaries(&p, b"ab\ncd");
        assert_eq!(bounds.len(), 2);
        assert_eq!((bounds[0].offset, bounds[0].start, bounds[0].count), (0, true, 3));
        assert_eq!((bounds[1].offset, bounds[1].start), (4, false));
    }

    #[test]
    fn boundaries_are_balanced_and_ordered() {
        let src = b"one\ntwo\nthree\nfour\n";
        let p = profile(vec![
            block((1, 2, 2, 3), 1),
            block((2, 3, 3, 4), 4),
            block((4, 2, 4, 4), 0),
        ]);
        let bounds = boundaries(&p, src);
        let mut depth = 0i32;
        let mut last_offset = 0;
        for b in &bounds {
            assert!(b.offset >= last_offset);
            last_offset = b.offset;
            depth += if b.start { 1 } else { -1 };
            assert!(depth >= 0);
        }
        assert_eq!(depth, 0);
    }

    #[test]
    fn set_mode_counts_normalize_to_flat_heat() {
        let p = profile(vec![block((1, 2, 1, 4), 1), block((2, 1, 2, 3), 1)]);
        let bounds = boundaries(&p, b"abcd\nefg\n");
        let starts: Vec<f64> = bounds.iter().filter(|b| b.start).map(|b| b.norm).collect();
        assert_eq!(starts, vec![0.8, 0.8]);
    }

    #[test]
    fn counts_normalize_logarithmically() {
        let src = b"abcdefgh\nabcdefgh\n";
        let p = profile(vec![block((1, 2, 1, 4), 100), block((2, 1, 2, 3), 10)]);
        let bounds = boundaries(&p, src);
        let starts: Vec<&Boundary> = bounds.iter().filter(|b| b.start).collect();
        assert_eq!(starts[0].norm, 1.0);
        assert!((starts[1].norm - 0.5).abs() < 1e-9);
    }

    #[test]
    fn block_past_source_end_is_truncated() {
        let p = profile(vec![block((1, 2, 9, 9), 2)]);
        let bounds = boundaries(&p, b"ab");
        // Source ends before the block closes; only the opening marker fits.
        assert_eq!(bounds.len(), 1);
        assert!(bounds[0].start);
    }
}
