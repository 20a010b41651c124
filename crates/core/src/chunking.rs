use crate::catalog::chunk;
use crate::error::PipelineError;
use crate::models::{AppliedConfig, ChunkRecord, ParsedPage};
use crate::traits::Chunker;
use async_trait::async_trait;
use regex::Regex;

const DEFAULT_TOKEN_SIZE: u64 = 500;
const DEFAULT_OVERLAP: f64 = 0.1;

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Distance between window starts: `size` minus the overlapping tokens, at least 1.
pub fn window_step(token_size: usize, overlap: f64) -> usize {
    let overlap = overlap.clamp(0.0, 1.0);
    let shared = (token_size as f64 * overlap).floor() as usize;
    token_size.saturating_sub(shared).max(1)
}

/// Fixed windows of whitespace-delimited tokens. Windows never cross a page.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedTokenChunker;

impl FixedTokenChunker {
    fn chunk_pages(
        pages: &[ParsedPage],
        token_size: usize,
        overlap: f64,
    ) -> Result<Vec<ChunkRecord>, PipelineError> {
        if token_size == 0 {
            return Err(PipelineError::validation("token_size must be positive"));
        }
        let token_re = Regex::new(r"\S+")?;
        let step = window_step(token_size, overlap);

        let mut chunks = Vec::new();
        for page in pages {
            let tokens = token_re
                .find_iter(&page.text)
                .map(|token| (token.start(), token.end()))
                .collect::<Vec<_>>();
            if tokens.is_empty() {
                continue;
            }

            let mut start = 0;
            loop {
                let end = (start + token_size).min(tokens.len());
                let (byte_start, _) = tokens[start];
                let (_, byte_end) = tokens[end - 1];
                chunks.push(ChunkRecord {
                    index: chunks.len(),
                    text: normalize_whitespace(&page.text[byte_start..byte_end]),
                    page: Some(page.number),
                    start: byte_start,
                    end: byte_end,
                });
                if end == tokens.len() {
                    break;
                }
                start += step;
            }
        }
        Ok(chunks)
    }
}

#[async_trait]
impl Chunker for FixedTokenChunker {
    async fn chunk(
        &self,
        pages: &[ParsedPage],
        config: &AppliedConfig,
    ) -> Result<Vec<ChunkRecord>, PipelineError> {
        let token_size = config.u64_or(chunk::TOKEN_SIZE, DEFAULT_TOKEN_SIZE)? as usize;
        let overlap = config.f64_or(chunk::OVERLAP, DEFAULT_OVERLAP)?;
        Self::chunk_pages(pages, token_size, overlap)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ByPageChunker;

#[async_trait]
impl Chunker for ByPageChunker {
    async fn chunk(
        &self,
        pages: &[ParsedPage],
        _config: &AppliedConfig,
    ) -> Result<Vec<ChunkRecord>, PipelineError> {
        Ok(pages
            .iter()
            .filter(|page| !page.text.trim().is_empty())
            .enumerate()
            .map(|(index, page)| ChunkRecord {
                index,
                text: normalize_whitespace(&page.text),
                page: Some(page.number),
                start: 0,
                end: page.text.len(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: u32, tokens: usize) -> ParsedPage {
        let text = (0..tokens)
            .map(|index| format!("w{index}"))
            .collect::<Vec<_>>()
            .join(" ");
        ParsedPage { number, text }
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn overlap_controls_window_count() {
        let pages = [page(1, 800)];
        let plain = FixedTokenChunker::chunk_pages(&pages, 100, 0.0).expect("chunks");
        assert_eq!(plain.len(), 8);

        let overlapped = FixedTokenChunker::chunk_pages(&pages, 100, 0.1).expect("chunks");
        assert_eq!(overlapped.len(), 9);
        assert!(overlapped[1].text.starts_with("w90 "));
        assert!(overlapped[8].text.ends_with("w799"));
    }

    #[test]
    fn spans_point_into_the_page() {
        let pages = [ParsedPage {
            number: 4,
            text: "  alpha   beta\ngamma ".to_string(),
        }];
        let chunks = FixedTokenChunker::chunk_pages(&pages, 2, 0.0).expect("chunks");
        assert_eq!(chunks.len(), 2);
        assert_eq!(&pages[0].text[chunks[0].start..chunks[0].end], "alpha   beta");
        assert_eq!(chunks[0].text, "alpha beta");
        assert_eq!(chunks[1].text, "gamma");
        assert_eq!(chunks[1].page, Some(4));
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn full_overlap_still_advances() {
        assert_eq!(window_step(100, 1.0), 1);
        assert_eq!(window_step(500, 0.1), 450);
    }

    #[tokio::test]
    async fn unreadable_token_size_is_rejected() {
        let config = AppliedConfig::new(
            serde_json::from_value(serde_json::json!({"token_size": 799.5})).expect("object"),
        );
        let error = FixedTokenChunker
            .chunk(&[page(1, 800)], &config)
            .await
            .expect_err("fractional token size");
        assert_eq!(error.status_code(), 400);
    }

    #[tokio::test]
    async fn by_page_skips_blank_pages() {
        let pages = [
            page(1, 3),
            ParsedPage {
                number: 2,
                text: "   ".to_string(),
            },
            page(3, 2),
        ];
        let chunks = ByPageChunker
            .chunk(&pages, &AppliedConfig::new(Default::default()))
            .await
            .expect("chunks");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].page, Some(3));
        assert_eq!(chunks[1].index, 1);
    }
}
