use crate::Boundary;
use std::fmt::Write as _;
use std::io;

/// Writes `src` with coverage `<span>` annotations opened and closed at the
/// given boundaries. HTML metacharacters are escaped and tabs expand to
/// eight spaces; all other bytes pass through untouched.
pub fn html_annotate<W: io::Write>(
    src: &[u8],
    boundaries: &[Boundary],
    out: &mut W,
) -> io::Result<()> {
    let mut pending = boundaries;
    for (i, &byte) in src.iter().enumerate() {
        while let Some(b) = pending.first() {
            if b.offset != i {
                break;
            }
            if b.start {
                let class = if b.count > 0 {
                    (b.norm * 9.0).floor() as u32 + 1
                } else {
                    0
                };
                write!(out, "<span class=\"cov{}\" title=\"{}\">", class, b.count)?;
            } else {
                out.write_all(b"</span>")?;
            }
            pending = &pending[1..];
        }
        match byte {
            b'>' => out.write_all(b"&gt;")?,
            b'<' => out.write_all(b"&lt;")?,
            b'&' => out.write_all(b"&amp;")?,
            b'\t' => out.write_all(b"        ")?,
            _ => out.write_all(&[byte])?,
        }
    }
    Ok(())
}

/// CSS color for a coverage class between 0 (never run) and 10 (hottest).
pub fn rgb(class: u32) -> String {
    if class == 0 {
        return "rgb(192, 0, 0)".to_string();
    }
    // Gradient from gray to green.
    let n = class as i32 - 1;
    format!("rgb({}, {}, {})", 128 - 12 * n, 128 + 12 * n, 128 + 3 * n)
}

/// CSS rules for every coverage class.
pub fn color_css() -> String {
    let mut out = String::new();
    for class in 0..11 {
        let _ = writeln!(out, ".cov{} {{ color: {} }}", class, rgb(class));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn annotate(src: &[u8], boundaries: &[Boundary]) -> String {
        let mut out = Vec::new();
        html_annotate(src, boundaries, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn boundary(offset: usize, start: bool, count: u64, norm: f64, index: usize) -> Boundary {
        Boundary {
            offset,
            start,
            count,
            norm,
            index,
        }
    }

    #[test]
    fn escapes_html_metacharacters() {
        assert_eq!(annotate(b"a<b>&\tc", &[]), "a&lt;b&gt;&amp;        c");
    }

    #[test]
    fn opens_and_closes_spans() {
        let bounds = [
            boundary(0, true, 5, 1.0, 0),
            boundary(3, false, 0, 0.0, 1),
        ];
        assert_eq!(
            annotate(b"abcd", &bounds),
            "<span class=\"cov10\" title=\"5\">abc</span>d"
        );
    }

    #[test]
    fn uncovered_blocks_use_class_zero() {
        let bounds = [
            boundary(0, true, 0, 0.0, 0),
            boundary(2, false, 0, 0.0, 1),
        ];
        assert_eq!(
            annotate(b"ab", &bounds),
            "<span class=\"cov0\" title=\"0\">ab"
        );
    }

    #[test]
    fn adjacent_boundaries_emit_in_index_order() {
        let bounds = [
            boundary(0, true, 1, 0.8, 0),
            boundary(1, false, 0, 0.0, 1),
            boundary(1, true, 2, 0.8, 2),
            boundary(2, false, 0, 0.0, 3),
        ];
        assert_eq!(
            annotate(b"xy", &bounds),
            "<span class=\"cov8\" title=\"1\">x</span><span class=\"cov8\" title=\"2\">y"
        );
    }

    #[test]
    fn rgb_endpoints() {
        assert_eq!(rgb(0), "rgb(192, 0, 0)");
        assert_eq!(rgb(1), "rgb(128, 128, 128)");
        assert_eq!(rgb(10), "rgb(20, 236, 155)");
    }

    #[test]
    fn css_covers_all_classes() {
        let css = color_css();
        assert_eq!(css.lines().count(), 11);
        assert!(css.starts_with(".cov0 { color: rgb(192, 0, 0) }"));
    }
}
