//! Chapter ordering strategies used for previous/next navigation.

use crate::types::{Chapter, ChapterSorting};

/// Orders chapters by descending source order. Ties keep their input order.
pub fn by_source_order(chapters: &[Chapter]) -> Vec<Chapter> {
    let mut ordered = chapters.to_vec();
    ordered.sort_by(|a, b| b.source_order.cmp(&a.source_order));
    ordered
}

/// Keeps one chapter per chapter number, ordered by ascending number.
///
/// For each number, in order of first appearance, the representative is:
/// the selected chapter when the number is its own, the only chapter with
/// that number, the first chapter sharing the selected chapter's scanlator,
/// or else the first chapter with that number.
pub fn by_chapter_number(chapters: &[Chapter], selected: &Chapter) -> Vec<Chapter> {
    let mut groups: Vec<(f32, Vec<&Chapter>)> = Vec::new();
    for chapter in chapters {
        let number = chapter.chapter_number;
        match groups
            .iter_mut()
            .find(|(key, _)| key.to_bits() == number.to_bits())
        {
            Some((_, members)) => members.push(chapter),
            None => groups.push((number, vec![chapter])),
        }
    }

    let mut ordered: Vec<Chapter> = groups
        .into_iter()
        .map(|(number, members)| {
            if number.to_bits() == selected.chapter_number.to_bits() {
                return selected.clone();
            }
            let preferred = match members.as_slice() {
                [only] => *only,
                _ => members
                    .iter()
                    .find(|chapter| chapter.scanlator == selected.scanlator)
                    .copied()
                    .unwrap_or(members[0]),
            };
            preferred.clone()
        })
        .collect();

    ordered.sort_by(|a, b| a.chapter_number.total_cmp(&b.chapter_number));
    ordered
}

impl ChapterSorting {
    /// Orders `chapters` with this strategy. `selected` is the chapter the
    /// reader was opened on.
    pub fn apply(self, chapters: &[Chapter], selected: &Chapter) -> Vec<Chapter> {
        match self {
            ChapterSorting::Source => by_source_order(chapters),
            ChapterSorting::Number => by_chapter_number(chapters, selected),
        }
    }
}
