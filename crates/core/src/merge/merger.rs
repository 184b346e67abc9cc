//! Three-way merge engine.
//!
//! Line-based diff3 over raw bytes. Both sides are diffed against the base
//! with `similar`; change hunks whose base ranges overlap or touch are
//! grouped into one region. A region changed by one side takes that side,
//! a region changed identically by both takes it once, and anything else
//! becomes a conflict block:
//!
//! ```text
//! <<<<<<< .mine
//! local lines
//! =======
//! upstream lines
//! >>>>>>> .rNEW
//! ```

use std::ops::Range;

use similar::{Algorithm, DiffTag};
use tracing::{debug, info};

/// Number of leading bytes inspected for a NUL when sniffing binaries.
const BINARY_SNIFF_LEN: usize = 8000;

/// Marker labels written after `<<<<<<<` and `>>>>>>>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeLabels {
    pub ours: String,
    pub theirs: String,
}

impl Default for MergeLabels {
    fn default() -> Self {
        Self {
            ours: ".mine".into(),
            theirs: ".rNEW".into(),
        }
    }
}

/// The result of a three-way merge attempt.
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// The merged content (contains conflict markers if `has_conflicts` is true).
    pub merged_content: Vec<u8>,
    pub has_conflicts: bool,
    pub conflict_markers: Vec<ConflictMarker>,
}

impl MergeResult {
    fn clean(content: &[u8]) -> Self {
        Self {
            merged_content: content.to_vec(),
            has_conflicts: false,
            conflict_markers: Vec::new(),
        }
    }
}

/// A single conflict block within merged output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictMarker {
    /// Line (1-indexed) holding `<<<<<<<`.
    pub start_line: usize,
    /// Line (1-indexed) holding `>>>>>>>`.
    pub end_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Side {
    Ours,
    Theirs,
}

/// One op of a side's diff against the base, equal runs included.
#[derive(Debug, Clone)]
struct Span {
    tag: DiffTag,
    base: Range<usize>,
    lines: Range<usize>,
}

#[derive(Debug, Clone)]
struct Hunk {
    side: Side,
    base: Range<usize>,
}

/// Stateless three-way merge engine.
pub struct Merger;

impl Merger {
    /// Merge `ours` and `theirs`, both descended from `base`.
    pub fn three_way_merge(
        base: &[u8],
        ours: &[u8],
        theirs: &[u8],
        labels: &MergeLabels,
    ) -> MergeResult {
        if ours == base {
            debug!("ours == base, theirs wins cleanly");
            return MergeResult::clean(theirs);
        }
        if theirs == base || ours == theirs {
            debug!("theirs adds nothing over ours");
            return MergeResult::clean(ours);
        }

        let base_lines = split_lines(base);
        let ours_lines = split_lines(ours);
        let theirs_lines = split_lines(theirs);

        let ours_spans = diff_spans(&base_lines, &ours_lines);
        let theirs_spans = diff_spans(&base_lines, &theirs_lines);
        let mut hunks = change_hunks(&ours_spans, Side::Ours);
        hunks.extend(change_hunks(&theirs_spans, Side::Theirs));
        hunks.sort_by_key(|h| (h.base.start, h.base.end, h.side));

        let mut out = Output::default();
        let mut cursor = 0;
        let mut i = 0;
        while i < hunks.len() {
            let region_start = hunks[i].base.start;
            let mut region_end = hunks[i].base.end;
            let mut j = i + 1;
            while j < hunks.len() && hunks[j].base.start <= region_end {
                region_end = region_end.max(hunks[j].base.end);
                j += 1;
            }
            let region = &hunks[i..j];

            out.push_lines(&base_lines[cursor..region_start]);

            let ours_touched = region.iter().any(|h| h.side == Side::Ours);
            let theirs_touched = region.iter().any(|h| h.side == Side::Theirs);
            let unchanged = &base_lines[region_start..region_end];
            let ours_block = if ours_touched {
                side_block(&ours_lines, &ours_spans, region_start..region_end)
            } else {
                unchanged
            };
            let theirs_block = if theirs_touched {
                side_block(&theirs_lines, &theirs_spans, region_start..region_end)
            } else {
                unchanged
            };

            if !theirs_touched || ours_block == theirs_block {
                out.push_lines(ours_block);
            } else if !ours_touched {
                out.push_lines(theirs_block);
            } else {
                out.push_conflict(ours_block, theirs_block, labels);
            }

            cursor = region_end;
            i = j;
        }
        out.push_lines(&base_lines[cursor..]);

        let has_conflicts = !out.markers.is_empty();
        info!(
            conflicts = out.markers.len(),
            "three-way merge finished"
        );
        MergeResult {
            merged_content: out.bytes,
            has_conflicts,
            conflict_markers: out.markers,
        }
    }

    /// A file is treated as binary when its first bytes contain a NUL.
    pub fn is_binary(content: &[u8]) -> bool {
        content[..content.len().min(BINARY_SNIFF_LEN)].contains(&0)
    }
}

fn split_lines(text: &[u8]) -> Vec<&[u8]> {
    text.split_inclusive(|b| *b == b'\n').collect()
}

fn diff_spans(base: &[&[u8]], other: &[&[u8]]) -> Vec<Span> {
    similar::capture_diff_slices(Algorithm::Myers, base, other)
        .iter()
        .map(|op| {
            let (tag, base, lines) = op.as_tag_tuple();
            Span { tag, base, lines }
        })
        .collect()
}

fn change_hunks(spans: &[Span], side: Side) -> Vec<Hunk> {
    spans
        .iter()
        .filter(|span| span.tag != DiffTag::Equal)
        .map(|span| Hunk {
            side,
            base: span.base.clone(),
        })
        .collect()
}

/// The lines a side holds in place of the base lines `region`.
///
/// No change hunk of either side straddles a region boundary, so each
/// boundary falls inside an equal run, on a change edge, or at an insert.
fn side_block<'a>(
    lines: &'a [&'a [u8]],
    spans: &[Span],
    region: Range<usize>,
) -> &'a [&'a [u8]] {
    let lo = spans
        .iter()
        .find_map(|span| start_of(span, region.start))
        .unwrap_or(lines.len())
        .min(lines.len());
    let hi = spans
        .iter()
        .rev()
        .find_map(|span| end_of(span, region.end))
        .unwrap_or(0)
        .clamp(lo, lines.len());
    &lines[lo..hi]
}

fn start_of(span: &Span, at: usize) -> Option<usize> {
    let hit = span.base.contains(&at) || (span.base.is_empty() && span.base.start == at);
    hit.then(|| match span.tag {
        DiffTag::Equal => span.lines.start + (at - span.base.start),
        _ => span.lines.start,
    })
}

fn end_of(span: &Span, at: usize) -> Option<usize> {
    let hit = (span.base.start < at && at <= span.base.end)
        || (span.base.is_empty() && span.base.start == at);
    hit.then(|| match span.tag {
        DiffTag::Equal => span.lines.start + (at - span.base.start),
        _ => span.lines.end,
    })
}

#[derive(Default)]
struct Output {
    bytes: Vec<u8>,
    line_count: usize,
    markers: Vec<ConflictMarker>,
}

impl Output {
    fn push_lines(&mut self, lines: &[&[u8]]) {
        for line in lines {
            self.bytes.extend_from_slice(line);
        }
        self.line_count += lines.len();
    }

    /// Push a block so that it always ends in a newline.
    fn push_terminated(&mut self, lines: &[&[u8]]) {
        self.push_lines(lines);
        if !lines.is_empty() && !self.bytes.ends_with(b"\n") {
            self.bytes.push(b'\n');
        }
    }

    fn push_marker(&mut self, marker: &str) {
        self.bytes.extend_from_slice(marker.as_bytes());
        self.bytes.push(b'\n');
        self.line_count += 1;
    }

    fn push_conflict(&mut self, ours: &[&[u8]], theirs: &[&[u8]], labels: &MergeLabels) {
        if !self.bytes.is_empty() && !self.bytes.ends_with(b"\n") {
            self.bytes.push(b'\n');
        }
        self.push_marker(&format!("<<<<<<< {}", labels.ours));
        let start_line = self.line_count;
        self.push_terminated(ours);
        self.push_marker("=======");
        self.push_terminated(theirs);
        self.push_marker(&format!(">>>>>>> {}", labels.theirs));
        self.markers.push(ConflictMarker {
            start_line,
            end_line: self.line_count,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(base: &str, ours: &str, theirs: &str) -> (String, bool) {
        let result = Merger::three_way_merge(
            base.as_bytes(),
            ours.as_bytes(),
            theirs.as_bytes(),
            &MergeLabels::default(),
        );
        (
            String::from_utf8(result.merged_content).unwrap(),
            result.has_conflicts,
        )
    }

    #[test]
    fn test_identical_content() {
        let (merged, conflicted) = merge("line1\nline2\n", "line1\nline2\n", "line1\nline2\n");
        assert!(!conflicted);
        assert_eq!(merged, "line1\nline2\n");
    }

    #[test]
    fn test_only_upstream_changed() {
        let (merged, conflicted) = merge(
            "Readme - first commit\n",
            "Readme - first commit\n",
            "Readme - first commit\nReadme - second commit\n",
        );
        assert!(!conflicted);
        assert_eq!(merged, "Readme - first commit\nReadme - second commit\n");
    }

    #[test]
    fn test_only_local_changed() {
        let (merged, conflicted) = merge("a\nb\n", "a\nB\n", "a\nb\n");
        assert!(!conflicted);
        assert_eq!(merged, "a\nB\n");
    }

    #[test]
    fn test_non_overlapping_changes() {
        let base = "line1\nline2\nline3\nline4\nline5\n";
        let ours = "LINE1\nline2\nline3\nline4\nline5\n";
        let theirs = "line1\nline2\nline3\nline4\nLINE5\n";
        let (merged, conflicted) = merge(base, ours, theirs);
        assert!(!conflicted);
        assert_eq!(merged, "LINE1\nline2\nline3\nline4\nLINE5\n");
    }

    #[test]
    fn test_same_change_on_both_sides() {
        let base = "a\nb\nc\nd\n";
        let ours = "a\nX\nc\nd\n";
        let theirs = "a\nX\nc\nD\n";
        let (merged, conflicted) = merge(base, ours, theirs);
        assert!(!conflicted);
        assert_eq!(merged, "a\nX\nc\nD\n");
    }

    #[test]
    fn test_competing_appends_conflict() {
        let base = "conflicting_file\n";
        let ours = "conflicting_file\nworking copy\n";
        let theirs = "conflicting_file\nparent repository\n";
        let result = Merger::three_way_merge(
            base.as_bytes(),
            ours.as_bytes(),
            theirs.as_bytes(),
            &MergeLabels::default(),
        );
        assert!(result.has_conflicts);
        assert_eq!(
            String::from_utf8(result.merged_content).unwrap(),
            "conflicting_file\n\
             <<<<<<< .mine\n\
             working copy\n\
             =======\n\
             parent repository\n\
             >>>>>>> .rNEW\n"
        );
        assert_eq!(
            result.conflict_markers,
            vec![ConflictMarker {
                start_line: 2,
                end_line: 6
            }]
        );
    }

    #[test]
    fn test_conflict_block_without_trailing_newline() {
        let (merged, conflicted) = merge("x\n", "x\nours", "x\ntheirs");
        assert!(conflicted);
        assert_eq!(
            merged,
            "x\n<<<<<<< .mine\nours\n=======\ntheirs\n>>>>>>> .rNEW\n"
        );
    }

    #[test]
    fn test_conflict_keeps_surrounding_lines() {
        let base = "head\nmiddle\ntail\n";
        let ours = "head\nmine\ntail\n";
        let theirs = "head\nyours\ntail\n";
        let (merged, conflicted) = merge(base, ours, theirs);
        assert!(conflicted);
        assert!(merged.starts_with("head\n<<<<<<< .mine\nmine\n=======\nyours\n"));
        assert!(merged.ends_with(">>>>>>> .rNEW\ntail\n"));
    }

    #[test]
    fn test_empty_base_with_different_sides() {
        let (merged, conflicted) = merge("", "local\n", "upstream\n");
        assert!(conflicted);
        assert_eq!(
            merged,
            "<<<<<<< .mine\nlocal\n=======\nupstream\n>>>>>>> .rNEW\n"
        );
    }

    #[test]
    fn test_one_side_empties_the_file() {
        assert_eq!(merge("a\nb\n", "", "a\nb\n"), (String::new(), false));
        assert_eq!(merge("a\nb\n", "a\nb\n", ""), (String::new(), false));

        let (merged, conflicted) = merge("a\nb\nc\n", "", "a\nB\nc\n");
        assert!(conflicted);
        assert_eq!(merged, "<<<<<<< .mine\n=======\na\nB\nc\n>>>>>>> .rNEW\n");
    }

    #[test]
    fn test_emptied_side_against_reordered_lines() {
        let (merged, conflicted) = merge("c\nd\n", "", "d\nd\n");
        assert!(conflicted);
        assert_eq!(merged, "<<<<<<< .mine\n=======\nd\nd\n>>>>>>> .rNEW\n");
    }

    #[test]
    fn test_unterminated_side_against_grown_side() {
        let (merged, conflicted) = merge("d\nb\n", "e", "b\neeb\nb\n");
        assert!(conflicted);
        assert_eq!(
            merged,
            "<<<<<<< .mine\ne\n=======\nb\neeb\nb\n>>>>>>> .rNEW\n"
        );
    }

    #[test]
    fn test_region_boundary_inside_unchanged_run() {
        let base = "1\n2\n3\n4\n";
        let ours = "1\nX\nY\n4\n";
        let theirs = "1\n2\nZ\n4\n";
        let (merged, conflicted) = merge(base, ours, theirs);
        assert!(conflicted);
        assert_eq!(
            merged,
            "1\n<<<<<<< .mine\nX\nY\n=======\n2\nZ\n>>>>>>> .rNEW\n4\n"
        );
    }

    #[test]
    fn test_binary_detection() {
        assert!(Merger::is_binary(b"PNG\0\x01\x02"));
        assert!(!Merger::is_binary(b"plain text\n"));
        let mut late_nul = vec![b'a'; BINARY_SNIFF_LEN];
        late_nul.push(0);
        assert!(!Merger::is_binary(&late_nul));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn text() -> impl Strategy<Value = String> {
            let lines = vec!["a\n", "b\n", "c\n", "ab\n", "\n", "e"];
            prop::collection::vec(prop::sample::select(lines), 0..8).prop_map(|l| l.concat())
        }

        proptest! {
            #[test]
            fn test_merge_is_symmetric(base in text(), ours in text(), theirs in text()) {
                let labels = MergeLabels::default();
                let forward =
                    Merger::three_way_merge(base.as_bytes(), ours.as_bytes(), theirs.as_bytes(), &labels);
                let backward =
                    Merger::three_way_merge(base.as_bytes(), theirs.as_bytes(), ours.as_bytes(), &labels);
                prop_assert_eq!(forward.has_conflicts, backward.has_conflicts);
                prop_assert_eq!(forward.has_conflicts, !forward.conflict_markers.is_empty());
                if !forward.has_conflicts {
                    prop_assert_eq!(forward.merged_content, backward.merged_content);
                }
            }

            #[test]
            fn test_untouched_side_yields_the_other(base in text(), other in text()) {
                prop_assert_eq!(merge(&base, &base, &other), (other.clone(), false));
                prop_assert_eq!(merge(&base, &other, &base), (other, false));
            }

            #[test]
            fn test_disjoint_edits_both_land(head in text(), tail in text()) {
                let base = format!("{}middle\n{}", head, tail);
                let ours = format!("top\n{}", base);
                let theirs = format!("{}bottom\n", base);
                let (merged, conflicted) = merge(&base, &ours, &theirs);
                if base.ends_with('\n') {
                    prop_assert!(!conflicted);
                    prop_assert_eq!(merged, format!("top\n{}bottom\n", base));
                }
            }
        }
    }
}
