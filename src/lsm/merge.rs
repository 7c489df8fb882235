//! Maximum non-overlapping set selection (spec.md §4.3 "Find maximum
//! non-overlapping set"): the greedy interval-scheduling pass used before
//! every level merge to decide which parts can be promoted untouched and
//! which must go through the level's compactor function.

use std::cmp::Ordering;

use crate::part::Part;
use crate::schema::Schema;

/// Splits `parts` into a non-overlapping subset (promoted as-is) and an
/// overlapping subset (fed through the compactor), per the greedy
/// algorithm in spec.md §4.3:
///
/// 1. Sort by `least()` ascending.
/// 2. Walk left to right with a cursor; a candidate whose `least` is
///    `>= cursor.most` (strict) is disjoint from the cursor and joins the
///    non-overlapping set, becoming the new cursor. Otherwise the
///    earlier-ending of {cursor, candidate} is kept (ties drop the later
///    candidate) and the other is dropped into the overlapping set.
///
/// The result is then expanded to a fixpoint: any part initially placed
/// in the non-overlapping set that in fact overlaps a part now in the
/// overlapping set is moved over too, since compacting only the latter
/// would otherwise produce two promoted parts with intersecting ranges.
/// Parts with no rows (empty `least`/`most`) are treated as
/// non-overlapping with everything and always promoted as-is.
pub fn partition(parts: &[Part], schema: &Schema) -> (Vec<Part>, Vec<Part>) {
    if parts.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let mut sorted: Vec<Part> = parts.to_vec();
    sorted.sort_by(|a, b| match (a.least(schema), b.least(schema)) {
        (Some(al), Some(bl)) => schema.cmp(&al, &bl),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    let mut non_overlap: Vec<Part> = Vec::new();
    let mut overlap: Vec<Part> = Vec::new();

    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else { return (Vec::new(), Vec::new()) };
    let mut cursor = first;

    for candidate in iter {
        let (Some(cursor_most), Some(cand_least)) = (cursor.most(schema), candidate.least(schema)) else {
            // Either side is empty (no rows): cannot overlap anything.
            non_overlap.push(std::mem::replace(&mut cursor, candidate));
            continue;
        };

        if schema.cmp(&cand_least, &cursor_most) != Ordering::Less {
            // Disjoint: candidate starts at or after the cursor ends.
            non_overlap.push(std::mem::replace(&mut cursor, candidate));
        } else {
            // Overlap: keep whichever ends earlier; tie drops the candidate.
            let cand_most = candidate.most(schema).expect("candidate has least, so has most");
            if schema.cmp(&cand_most, &cursor_most) == Ordering::Less {
                overlap.push(std::mem::replace(&mut cursor, candidate));
            } else {
                overlap.push(candidate);
            }
        }
    }
    non_overlap.push(cursor);

    expand_to_fixpoint(non_overlap, overlap, schema)
}

/// Moves any `non_overlap` part that overlaps something in `overlap` into
/// `overlap`, repeating until no more moves occur.
fn expand_to_fixpoint(mut non_overlap: Vec<Part>, mut overlap: Vec<Part>, schema: &Schema) -> (Vec<Part>, Vec<Part>) {
    loop {
        let mut moved_index = None;
        'search: for (i, candidate) in non_overlap.iter().enumerate() {
            for member in &overlap {
                if candidate.overlaps_with(member, schema) {
                    moved_index = Some(i);
                    break 'search;
                }
            }
        }
        match moved_index {
            Some(i) => overlap.push(non_overlap.remove(i)),
            None => break,
        }
    }
    (non_overlap, overlap)
}
