use crate::models::Page;

pub const DEFAULT_PAGE_CHUNK_SIZE: usize = 20;

pub fn chunk_pages(pages: &[Page], size: usize) -> Vec<Vec<Page>> {
    pages
        .chunks(size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

pub fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(count: u32) -> Vec<Page> {
        (1..=count)
            .map(|number| Page::new(number, format!("page {number}")))
            .collect()
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_pages(&[], DEFAULT_PAGE_CHUNK_SIZE).is_empty());
    }

    #[test]
    fn chunk_counts_and_sizes_follow_ceiling_division() {
        for (count, size) in [(1u32, 20usize), (20, 20), (21, 20), (45, 20), (7, 3), (9, 1)] {
            let input = pages(count);
            let chunks = chunk_pages(&input, size);

            let expected = (count as usize).div_ceil(size);
            assert_eq!(chunks.len(), expected, "count={count} size={size}");

            let (last, full) = chunks.split_last().expect("non-empty input");
            assert!(full.iter().all(|chunk| chunk.len() == size));
            assert!(!last.is_empty() && last.len() <= size);

            let rejoined: Vec<Page> = chunks.into_iter().flatten().collect();
            assert_eq!(rejoined, input);
        }
    }

    #[test]
    fn zero_size_does_not_panic() {
        let chunks = chunk_pages(&pages(3), 0);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn char_prefix_respects_multibyte_boundaries() {
        assert_eq!(char_prefix("héllo", 2), "hé");
        assert_eq!(char_prefix("abc", 10), "abc");
        assert_eq!(char_prefix("", 5), "");
    }
}
