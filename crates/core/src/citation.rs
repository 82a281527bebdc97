use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

const MAX_RANGE_SPAN: u32 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    pub filename: String,
    pub pages: Vec<u32>,
}

fn marker_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$PAGE_START([^:$]+):([0-9,\-\s]+)\$PAGE_END").ok())
        .as_ref()
}

pub fn extract_citations(text: &str) -> Vec<Citation> {
    let Some(pattern) = marker_pattern() else {
        return Vec::new();
    };
    pattern
        .captures_iter(text)
        .filter_map(|captures| {
            let filename = captures.get(1)?.as_str().trim();
            let pages = parse_page_list(captures.get(2)?.as_str());
            if filename.is_empty() || pages.is_empty() {
                return None;
            }
            Some(Citation {
                filename: filename.to_string(),
                pages,
            })
        })
        .collect()
}

fn parse_page_list(raw: &str) -> Vec<u32> {
    let mut pages = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let (Ok(start), Ok(end)) = (start.trim().parse::<u32>(), end.trim().parse::<u32>())
                else {
                    continue;
                };
                if start <= end && end - start <= MAX_RANGE_SPAN {
                    pages.extend(start..=end);
                }
            }
            None => {
                if let Ok(page) = part.parse::<u32>() {
                    pages.push(page);
                }
            }
        }
    }
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_list_and_range_markers_are_expanded() {
        let text = "Revenue grew $PAGE_STARTreport.pdf:5$PAGE_END, see also \
                    $PAGE_STARTanalysis.pdf:2,7,12$PAGE_END and $PAGE_STARTmanual.pdf:15-18$PAGE_END.";
        let citations = extract_citations(text);
        assert_eq!(
            citations,
            vec![
                Citation {
                    filename: "report.pdf".to_string(),
                    pages: vec![5]
                },
                Citation {
                    filename: "analysis.pdf".to_string(),
                    pages: vec![2, 7, 12]
                },
                Citation {
                    filename: "manual.pdf".to_string(),
                    pages: vec![15, 16, 17, 18]
                },
            ]
        );
    }

    #[test]
    fn mixed_lists_and_ranges_combine() {
        let citations = extract_citations("$PAGE_STARTa.pdf:1, 3-4$PAGE_END");
        assert_eq!(citations[0].pages, vec![1, 3, 4]);
    }

    #[test]
    fn malformed_markers_are_ignored() {
        assert!(extract_citations("$PAGE_START report.pdf 5 $PAGE_END").is_empty());
        assert!(extract_citations("$PAGE_STARTa.pdf:9-2$PAGE_END").is_empty());
        assert!(extract_citations("no markers at all").is_empty());
    }
}
