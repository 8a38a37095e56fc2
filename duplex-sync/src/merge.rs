//! Merge engine: two-way and three-way line merges built on `similar`.
//!
//! Inputs are normalised to LF before diffing and the output is LF. Regions
//! that cannot be merged are emitted inline as
//!
//! ```text
//! <<<<<<< LOCAL
//! local lines
//! =======
//! remote lines
//! >>>>>>> REMOTE
//! ```
//!
//! so the merge never fails outright; it degrades to a marked draft.

use std::ops::Range;

use similar::{Algorithm, DiffTag, TextDiff};

use duplex_core::{fingerprint, Conflict, MergeStrategy, ResolutionStrategy};

pub const MARKER_LOCAL: &str = "<<<<<<< LOCAL";
pub const MARKER_SEPARATOR: &str = "=======";
pub const MARKER_REMOTE: &str = ">>>>>>> REMOTE";

/// Result of a text merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Clean(String),
    /// At least one region overlapped; `draft` carries inline markers.
    Conflicted { draft: String, regions: usize },
}

impl MergeOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, MergeOutcome::Clean(_))
    }

    /// The merged text, with markers when conflicted.
    pub fn text(&self) -> &str {
        match self {
            MergeOutcome::Clean(text) => text,
            MergeOutcome::Conflicted { draft, .. } => draft,
        }
    }
}

/// What the configured strategy decided for a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    /// Leave it to a human.
    Manual,
    Resolved {
        content: String,
        strategy: ResolutionStrategy,
    },
    /// The automatic merge overlapped; a human finishes from `draft`.
    Markers { draft: String },
}

/// Applies the deployment-wide [`MergeStrategy`].
#[derive(Debug, Clone, Copy)]
pub struct MergeEngine {
    strategy: MergeStrategy,
}

impl MergeEngine {
    pub fn new(strategy: MergeStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    pub fn resolve(&self, conflict: &Conflict) -> MergeDecision {
        let (outcome, strategy) = match self.strategy {
            MergeStrategy::Manual => return MergeDecision::Manual,
            MergeStrategy::LastWriterWins => {
                return MergeDecision::Resolved {
                    content: conflict.remote_content.clone(),
                    strategy: ResolutionStrategy::KeepRemote,
                }
            }
            MergeStrategy::AutoMerge => (
                two_way(&conflict.local_content, &conflict.remote_content),
                ResolutionStrategy::Merge,
            ),
            MergeStrategy::ThreeWayMerge => (
                three_way_or_two_way(
                    conflict.base_content.as_deref(),
                    &conflict.local_content,
                    &conflict.remote_content,
                ),
                ResolutionStrategy::ThreeWay,
            ),
        };
        match outcome {
            MergeOutcome::Clean(content) => MergeDecision::Resolved { content, strategy },
            MergeOutcome::Conflicted { draft, regions } => {
                tracing::info!(
                    artifact = %conflict.artifact,
                    regions,
                    strategy = %self.strategy,
                    "automatic merge overlapped; falling back to conflict markers",
                );
                MergeDecision::Markers { draft }
            }
        }
    }
}

/// Three-way merge when a baseline exists, two-way otherwise.
pub fn three_way_or_two_way(base: Option<&str>, local: &str, remote: &str) -> MergeOutcome {
    match base {
        Some(base) => three_way(base, local, remote),
        None => {
            tracing::warn!("no merge baseline recorded; using two-way merge");
            two_way(local, remote)
        }
    }
}

// ---------------------------------------------------------------------------
// Line documents
// ---------------------------------------------------------------------------

/// Text split into lines (without terminators) plus whether it ended in a
/// newline.
struct Lines {
    lines: Vec<String>,
    trailing_newline: bool,
}

impl Lines {
    fn parse(text: &str) -> Self {
        let normalized = fingerprint::normalize(text);
        Self {
            trailing_newline: normalized.ends_with('\n'),
            lines: normalized.lines().map(str::to_owned).collect(),
        }
    }
}

fn render(lines: &[&str], trailing_newline: bool) -> String {
    let mut out = lines.join("\n");
    if trailing_newline && !lines.is_empty() {
        out.push('\n');
    }
    out
}

fn push_markers<'a>(out: &mut Vec<&'a str>, local: &[&'a str], remote: &[&'a str]) {
    out.push(MARKER_LOCAL);
    out.extend_from_slice(local);
    out.push(MARKER_SEPARATOR);
    out.extend_from_slice(remote);
    out.push(MARKER_REMOTE);
}

/// A contiguous edit: `base[range]` replaced by `other[replacement]`.
#[derive(Debug, Clone)]
struct Hunk {
    range: Range<usize>,
    replacement: Range<usize>,
}

/// Line hunks turning `base` into `other`, sorted and separated by at least
/// one unchanged line.
///
/// Hunks are the gaps between matched runs of the diff, so they cover both
/// sides exactly no matter how the diff orders its edit ops. A matched run
/// that does not line up with the runs before it is folded into a gap.
fn hunks(base: &[String], other: &[String]) -> Vec<Hunk> {
    let old: Vec<&str> = base.iter().map(String::as_str).collect();
    let new: Vec<&str> = other.iter().map(String::as_str).collect();
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_slices(&old[..], &new[..]);

    let mut anchors: Vec<(usize, usize, usize)> = diff
        .ops()
        .iter()
        .filter(|op| op.tag() == DiffTag::Equal)
        .map(|op| (op.old_range().start, op.new_range().start, op.old_range().len()))
        .filter(|&(_, _, len)| len > 0)
        .collect();
    anchors.sort_unstable();

    let mut out = Vec::new();
    let (mut old_pos, mut new_pos) = (0, 0);
    for (old_start, new_start, len) in anchors {
        if old_start < old_pos || new_start < new_pos {
            continue;
        }
        let matched = match (
            base.get(old_start..old_start + len),
            other.get(new_start..new_start + len),
        ) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        if !matched {
            continue;
        }
        push_gap(&mut out, old_pos..old_start, new_pos..new_start);
        old_pos = old_start + len;
        new_pos = new_start + len;
    }
    push_gap(&mut out, old_pos..base.len(), new_pos..other.len());
    out
}

fn push_gap(out: &mut Vec<Hunk>, range: Range<usize>, replacement: Range<usize>) {
    if !range.is_empty() || !replacement.is_empty() {
        out.push(Hunk { range, replacement });
    }
}

/// Whether two edits against the same base touch the same lines.
///
/// Two insertions collide only at the same point; an insertion collides with
/// a replacement only strictly inside it. Edits that merely abut do not.
fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    match (a.is_empty(), b.is_empty()) {
        (false, false) => a.start < b.end && b.start < a.end,
        (true, true) => a.start == b.start,
        (true, false) => b.start < a.start && a.start < b.end,
        (false, true) => a.start < b.start && b.start < a.end,
    }
}

// ---------------------------------------------------------------------------
// Two-way
// ---------------------------------------------------------------------------

/// Union merge of two texts with no common ancestor.
///
/// Lines present on only one side are kept; regions that differ on both
/// sides are marked.
pub fn two_way(local: &str, remote: &str) -> MergeOutcome {
    let local = Lines::parse(local);
    let remote = Lines::parse(remote);
    let mut out: Vec<&str> = Vec::new();
    let mut regions = 0;
    let mut pos = 0;

    for hunk in hunks(&local.lines, &remote.lines) {
        out.extend(local.lines[pos..hunk.range.start].iter().map(String::as_str));
        let ours: Vec<&str> = local.lines[hunk.range.clone()].iter().map(String::as_str).collect();
        let theirs: Vec<&str> = remote.lines[hunk.replacement.clone()]
            .iter()
            .map(String::as_str)
            .collect();
        if ours.is_empty() {
            out.extend(theirs);
        } else if theirs.is_empty() {
            out.extend(ours);
        } else {
            regions += 1;
            push_markers(&mut out, &ours, &theirs);
        }
        pos = hunk.range.end;
    }
    out.extend(local.lines[pos..].iter().map(String::as_str));

    let trailing = local.trailing_newline || remote.trailing_newline || regions > 0;
    finish(render(&out, trailing), regions)
}

// ---------------------------------------------------------------------------
// Three-way
// ---------------------------------------------------------------------------

/// Merge `local` and `remote` against their common ancestor `base`.
///
/// Edits from `diff(base→local)` and `diff(base→remote)` are replayed onto
/// `base` in position order. Non-overlapping edits are kept, identical edits
/// are applied once, and overlapping different edits become marked regions.
pub fn three_way(base: &str, local: &str, remote: &str) -> MergeOutcome {
    let base = Lines::parse(base);
    let local = Lines::parse(local);
    let remote = Lines::parse(remote);
    let ours = hunks(&base.lines, &local.lines);
    let theirs = hunks(&base.lines, &remote.lines);

    let mut out: Vec<&str> = Vec::new();
    let mut regions = 0;
    let mut pos = 0;
    let (mut i, mut j) = (0, 0);

    loop {
        let next = match (ours.get(i), theirs.get(j)) {
            (None, None) => break,
            (Some(l), None) => Step::Local(l),
            (None, Some(r)) => Step::Remote(r),
            (Some(l), Some(r)) if overlaps(&l.range, &r.range) => Step::Cluster,
            (Some(l), Some(r)) if precedes(l, r) => Step::Local(l),
            (Some(_), Some(r)) => Step::Remote(r),
        };

        match next {
            Step::Local(h) => {
                out.extend(base.lines[pos..h.range.start].iter().map(String::as_str));
                out.extend(local.lines[h.replacement.clone()].iter().map(String::as_str));
                pos = h.range.end;
                i += 1;
            }
            Step::Remote(h) => {
                out.extend(base.lines[pos..h.range.start].iter().map(String::as_str));
                out.extend(remote.lines[h.replacement.clone()].iter().map(String::as_str));
                pos = h.range.end;
                j += 1;
            }
            Step::Cluster => {
                // Grow the region until no hunk from either side touches it.
                let mut region = ours[i].range.start.min(theirs[j].range.start)
                    ..ours[i].range.end.max(theirs[j].range.end);
                let (start_i, start_j) = (i, j);
                i += 1;
                j += 1;
                loop {
                    if let Some(h) = ours.get(i).filter(|h| overlaps(&h.range, &region)) {
                        region.end = region.end.max(h.range.end);
                        i += 1;
                    } else if let Some(h) = theirs.get(j).filter(|h| overlaps(&h.range, &region)) {
                        region.end = region.end.max(h.range.end);
                        j += 1;
                    } else {
                        break;
                    }
                }

                let mine = apply_region(&base.lines, &local.lines, &ours[start_i..i], &region);
                let yours = apply_region(&base.lines, &remote.lines, &theirs[start_j..j], &region);
                out.extend(base.lines[pos..region.start].iter().map(String::as_str));
                if mine == yours {
                    out.extend(mine);
                } else {
                    regions += 1;
                    push_markers(&mut out, &mine, &yours);
                }
                pos = region.end;
            }
        }
    }
    out.extend(base.lines[pos..].iter().map(String::as_str));

    // Trailing newline follows whichever side changed it.
    let trailing = if local.trailing_newline != base.trailing_newline {
        local.trailing_newline
    } else {
        remote.trailing_newline
    };
    finish(render(&out, trailing || regions > 0), regions)
}

enum Step<'h> {
    Local(&'h Hunk),
    Remote(&'h Hunk),
    Cluster,
}

/// `a` must be replayed before `b`. Only called for non-overlapping hunks.
///
/// An insertion at the start of the other hunk's range goes first; an
/// insertion at its end goes after.
fn precedes(a: &Hunk, b: &Hunk) -> bool {
    a.range.end == b.range.start || a.range.start < b.range.start
}

/// `base[region]` with one side's hunks (all inside `region`) applied.
fn apply_region<'a>(
    base: &'a [String],
    side: &'a [String],
    hunks: &[Hunk],
    region: &Range<usize>,
) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut pos = region.start;
    for h in hunks {
        out.extend(base[pos..h.range.start].iter().map(String::as_str));
        out.extend(side[h.replacement.clone()].iter().map(String::as_str));
        pos = h.range.end;
    }
    out.extend(base[pos..region.end].iter().map(String::as_str));
    out
}

fn finish(text: String, regions: usize) -> MergeOutcome {
    if regions == 0 {
        MergeOutcome::Clean(text)
    } else {
        MergeOutcome::Conflicted {
            draft: text,
            regions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_way_keeps_single_sided_append() {
        let merged = three_way("hello", "hello world", "hello");
        assert_eq!(merged, MergeOutcome::Clean("hello world".to_string()));
    }

    #[test]
    fn three_way_combines_edits_on_adjacent_lines() {
        let merged = three_way(
            "line1\nline2",
            "line1-edited\nline2",
            "line1\nline2-edited",
        );
        assert_eq!(
            merged,
            MergeOutcome::Clean("line1-edited\nline2-edited".to_string())
        );
    }

    #[test]
    fn three_way_marks_overlapping_edits() {
        let merged = three_way("a\nb\nc\n", "a\nB-local\nc\n", "a\nB-remote\nc\n");
        match merged {
            MergeOutcome::Conflicted { draft, regions } => {
                assert_eq!(regions, 1);
                assert_eq!(
                    draft,
                    "a\n<<<<<<< LOCAL\nB-local\n=======\nB-remote\n>>>>>>> REMOTE\nc\n"
                );
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn three_way_applies_identical_edits_once() {
        let merged = three_way("a\nb\n", "a\nx\n", "a\nx\n");
        assert_eq!(merged, MergeOutcome::Clean("a\nx\n".to_string()));
    }

    #[test]
    fn three_way_inserts_at_same_point_conflict() {
        let merged = three_way("a\nz\n", "a\nlocal\nz\n", "a\nremote\nz\n");
        assert!(!merged.is_clean());
    }

    #[test]
    fn three_way_insertion_next_to_replacement_is_clean() {
        let merged = three_way("a\nb\nc\n", "a\nnew\nb\nc\n", "a\nB\nc\n");
        assert_eq!(merged, MergeOutcome::Clean("a\nnew\nB\nc\n".to_string()));
    }

    #[test]
    fn three_way_deletion_and_distant_edit() {
        let merged = three_way("1\n2\n3\n4\n5\n", "1\n3\n4\n5\n", "1\n2\n3\n4\nfive\n");
        assert_eq!(merged, MergeOutcome::Clean("1\n3\n4\nfive\n".to_string()));
    }

    #[test]
    fn three_way_normalises_crlf() {
        let merged = three_way("a\r\nb\r\n", "a\r\nb\r\nc\r\n", "a\nb\n");
        assert_eq!(merged, MergeOutcome::Clean("a\nb\nc\n".to_string()));
    }

    #[test]
    fn two_way_unions_one_sided_lines() {
        let merged = two_way("title\nlocal note\nbody\n", "title\nbody\nremote note\n");
        assert_eq!(
            merged,
            MergeOutcome::Clean("title\nlocal note\nbody\nremote note\n".to_string())
        );
    }

    #[test]
    fn two_way_marks_lines_changed_on_both_sides() {
        let merged = two_way("status: open\n", "status: closed\n");
        assert_eq!(
            merged.text(),
            "<<<<<<< LOCAL\nstatus: open\n=======\nstatus: closed\n>>>>>>> REMOTE\n"
        );
    }

    #[test]
    fn two_way_survives_edits_around_blank_lines() {
        let merged = two_way("\nb\n\na", "a\na");
        assert!(merged.text().contains("a"));
    }

    #[test]
    fn three_way_with_untouched_local_returns_remote() {
        let merged = three_way("b\nc\n\n", "b\nc\n\n", "b\n\nb\n\nb");
        assert_eq!(merged, MergeOutcome::Clean("b\n\nb\n\nb".to_string()));
    }

    #[test]
    fn hunks_cover_both_sides_exactly() {
        let base: Vec<String> = ["x", "", "b", "", "a"].map(String::from).to_vec();
        let other: Vec<String> = ["a", "", "x", "a"].map(String::from).to_vec();
        let mut rebuilt: Vec<&str> = Vec::new();
        let mut pos = 0;
        for h in hunks(&base, &other) {
            assert!(h.range.start >= pos, "hunks out of order");
            rebuilt.extend(base[pos..h.range.start].iter().map(String::as_str));
            rebuilt.extend(other[h.replacement.clone()].iter().map(String::as_str));
            pos = h.range.end;
        }
        rebuilt.extend(base[pos..].iter().map(String::as_str));
        assert_eq!(rebuilt, other);
    }

    #[test]
    fn overlap_rules() {
        assert!(overlaps(&(1..3), &(2..4)));
        assert!(!overlaps(&(1..2), &(2..3)));
        assert!(overlaps(&(2..2), &(2..2)));
        assert!(!overlaps(&(2..2), &(2..4)));
        assert!(overlaps(&(3..3), &(2..4)));
        assert!(!overlaps(&(4..4), &(2..4)));
    }
}

// ---------------------------------------------------------------------------
// Property tests
// ---------------------------------------------------------------------------
